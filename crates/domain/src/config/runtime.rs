use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Proactive tool-observation pruning inside a running turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruneConfig {
    /// Observations older than this many assistant turns are soft-trimmed.
    #[serde(default = "d_soft_age")]
    pub soft_age_turns: usize,
    /// Observations older than this many assistant turns are dropped to a
    /// one-line stub.
    #[serde(default = "d_hard_age")]
    pub hard_age_turns: usize,
    /// Soft-trim target size.
    #[serde(default = "d_soft_keep_chars")]
    pub soft_keep_chars: usize,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            soft_age_turns: d_soft_age(),
            hard_age_turns: d_hard_age(),
            soft_keep_chars: d_soft_keep_chars(),
        }
    }
}

fn d_soft_age() -> usize {
    6
}
fn d_hard_age() -> usize {
    12
}
fn d_soft_keep_chars() -> usize {
    1_500
}

/// Streaming block delivery tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default = "d_streaming_enabled")]
    pub enabled: bool,
    /// Flush when the buffer has been idle this long.
    #[serde(default = "d_idle_ms")]
    pub idle_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: d_streaming_enabled(),
            idle_ms: d_idle_ms(),
        }
    }
}

fn d_streaming_enabled() -> bool {
    true
}
fn d_idle_ms() -> u64 {
    900
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Model-call iterations allowed for one user request.
    #[serde(default = "d_max_turns")]
    pub max_turns_per_request: u32,
    #[serde(default = "d_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
    /// Extra turn budgets granted when the budget runs out while the model
    /// is still calling tools.
    #[serde(default = "d_max_continuations")]
    pub max_continuations: u32,
    /// A synthetic "K of M turns used" note is injected every N turns.
    #[serde(default = "d_reflection_interval")]
    pub reflection_interval: u32,
    /// Compact-and-retry budget for context-overflow errors.
    #[serde(default = "d_max_compaction_attempts")]
    pub max_compaction_attempts: u32,
    #[serde(default)]
    pub prune: PruneConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_turns_per_request: d_max_turns(),
            turn_timeout_secs: d_turn_timeout_secs(),
            max_continuations: d_max_continuations(),
            reflection_interval: d_reflection_interval(),
            max_compaction_attempts: d_max_compaction_attempts(),
            prune: PruneConfig::default(),
            streaming: StreamingConfig::default(),
        }
    }
}

fn d_max_turns() -> u32 {
    25
}
fn d_turn_timeout_secs() -> u64 {
    300
}
fn d_max_continuations() -> u32 {
    2
}
fn d_reflection_interval() -> u32 {
    8
}
fn d_max_compaction_attempts() -> u32 {
    3
}
