use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lanes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanesConfig {
    /// Concurrency bound per named lane. `session:*` lanes are always 1 and
    /// are not configurable.
    #[serde(default = "d_defaults")]
    pub max_concurrent: HashMap<String, usize>,
    /// Bound applied to lanes materialized on demand without an entry above.
    #[serde(default = "d_fallback")]
    pub fallback_max_concurrent: usize,
}

impl Default for LanesConfig {
    fn default() -> Self {
        Self {
            max_concurrent: d_defaults(),
            fallback_max_concurrent: d_fallback(),
        }
    }
}

fn d_defaults() -> HashMap<String, usize> {
    HashMap::from([
        ("global".to_string(), 4),
        ("cron".to_string(), 2),
        ("subagent".to_string(), 2),
    ])
}
fn d_fallback() -> usize {
    2
}

impl LanesConfig {
    pub fn limit_for(&self, lane: &str) -> usize {
        if lane.starts_with("session:") {
            return 1;
        }
        self.max_concurrent
            .get(lane)
            .copied()
            .unwrap_or(self.fallback_max_concurrent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_lanes_are_always_serial() {
        let mut config = LanesConfig::default();
        config.max_concurrent.insert("session:x".into(), 8);
        assert_eq!(config.limit_for("session:x"), 1);
    }

    #[test]
    fn named_and_fallback_limits() {
        let config = LanesConfig::default();
        assert_eq!(config.limit_for("global"), 4);
        assert_eq!(config.limit_for("bulk-import"), 2);
    }
}
