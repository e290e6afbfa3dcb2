//! Jittered exponential back-off for model calls.

use std::time::Duration;

/// Back-off policy applied per model before the failover chain moves on.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying the given attempt (0-indexed). A
    /// server-supplied `retry_after_ms` overrides the computed back-off
    /// when it is longer.
    pub fn delay_for_attempt(&self, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_factor.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        // ~25% jitter to prevent thundering herd.
        let jitter = capped_ms * 0.25 * pseudo_random_fraction(attempt);
        let computed = Duration::from_millis((capped_ms + jitter) as u64);

        match retry_after_ms {
            Some(server_ms) => computed.max(Duration::from_millis(server_ms)),
            None => computed,
        }
    }

    /// Whether the attempt budget is spent.
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt + 1 >= self.max_attempts
    }
}

/// Cheap deterministic "random" fraction [0, 1) based on attempt number.
/// Not cryptographically secure — just enough to spread retry storms.
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_mul(2654435761); // Knuth multiplicative hash
    (hash as f64) / (u32::MAX as f64)
}
