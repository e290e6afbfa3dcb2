use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What happens to a message that arrives while the session is mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum QueueMode {
    /// Enqueue; drain as one batch on the next idle turn.
    Collect,
    /// Deliver to the running agent through its steer channel.
    Steer,
    /// Enqueue; process after the current run completes.
    #[default]
    Followup,
    /// Cancel the running agent and start over with the new message.
    Interrupt,
    /// Steer if the running agent accepts; otherwise enqueue.
    SteerBacklog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Gather-followups window applied while the session is processing.
    /// An idle session drains immediately.
    #[serde(default = "d_debounce_ms")]
    pub debounce_ms: u64,
    /// Two identical messages within this window count as one.
    #[serde(default = "d_dedup_window_ms")]
    pub dedup_window_ms: u64,
    /// Queue depth bound; the oldest entry is dropped on overflow.
    #[serde(default = "d_max_pending")]
    pub max_pending: usize,
    #[serde(default)]
    pub default_mode: QueueMode,
    /// Per-channel mode overrides (key = channel id).
    #[serde(default)]
    pub mode_by_channel: std::collections::HashMap<String, QueueMode>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            debounce_ms: d_debounce_ms(),
            dedup_window_ms: d_dedup_window_ms(),
            max_pending: d_max_pending(),
            default_mode: QueueMode::default(),
            mode_by_channel: Default::default(),
        }
    }
}

fn d_debounce_ms() -> u64 {
    500
}
fn d_dedup_window_ms() -> u64 {
    5_000
}
fn d_max_pending() -> usize {
    32
}

impl QueueConfig {
    /// Effective mode for a channel (channel override, then global default).
    pub fn mode_for(&self, channel_id: &str) -> QueueMode {
        self.mode_by_channel
            .get(channel_id)
            .copied()
            .unwrap_or(self.default_mode)
    }
}
