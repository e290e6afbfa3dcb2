use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::QueueMode;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions & compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How much the model is asked to deliberate. Rendered by the composer's
/// thinking-hint layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    Off,
    #[default]
    Low,
    Medium,
    High,
}

impl std::str::FromStr for ThinkingLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(Self::Off),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown thinking level '{other}'")),
        }
    }
}

/// Per-session configuration overrides, adjustable via admin commands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_mode: Option<QueueMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompactionStrategy {
    /// Memory-flush turn, model summary of the dropped range, keep the
    /// newest 25% with the summary prepended.
    #[default]
    Summarize,
    /// Drop oldest entries down to half the threshold; no model call.
    Truncate,
    /// Keep only the last N entries verbatim.
    Sliding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    #[serde(default)]
    pub strategy: CompactionStrategy,
    /// Fraction of recent entries kept by the summarize strategy.
    #[serde(default = "d_keep_ratio")]
    pub keep_ratio: f64,
    /// Entries kept verbatim by the sliding strategy.
    #[serde(default = "d_sliding_keep")]
    pub sliding_keep: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            strategy: CompactionStrategy::default(),
            keep_ratio: d_keep_ratio(),
            sliding_keep: d_sliding_keep(),
        }
    }
}

fn d_keep_ratio() -> f64 {
    0.25
}
fn d_sliding_keep() -> usize {
    40
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Root for per-session directories and the audit log.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
    /// Maximum history length; preventive compaction fires at 80% of this.
    #[serde(default = "d_max_turns")]
    pub max_turns: usize,
    /// Sessions idle for longer than this are evicted from memory
    /// (reloaded on demand).
    #[serde(default = "d_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
    #[serde(default)]
    pub compaction: CompactionConfig,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
            max_turns: d_max_turns(),
            idle_ttl_secs: d_idle_ttl_secs(),
            compaction: CompactionConfig::default(),
        }
    }
}

fn d_state_path() -> PathBuf {
    PathBuf::from("./state")
}
fn d_max_turns() -> usize {
    200
}
fn d_idle_ttl_secs() -> u64 {
    1_800
}

impl SessionsConfig {
    /// Preventive threshold: 80% of the configured maximum, so no ongoing
    /// run hits the ceiling mid-flight.
    pub fn preventive_threshold(&self) -> usize {
        (self.max_turns * 4) / 5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preventive_threshold_is_80_percent() {
        let config = SessionsConfig {
            max_turns: 200,
            ..Default::default()
        };
        assert_eq!(config.preventive_threshold(), 160);
    }

    #[test]
    fn thinking_level_parses() {
        assert_eq!("medium".parse::<ThinkingLevel>(), Ok(ThinkingLevel::Medium));
        assert!("loud".parse::<ThinkingLevel>().is_err());
    }

    #[test]
    fn overrides_roundtrip_skips_none() {
        let overrides = SessionOverrides {
            model: Some("main/gpt-4o".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&overrides).unwrap();
        assert!(!json.contains("thinking"));
        let back: SessionOverrides = serde_json::from_str(&json).unwrap();
        assert_eq!(back, overrides);
    }
}
