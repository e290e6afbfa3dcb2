use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt composer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Named token budgets referenced by prompt layers. Numeric budget hints on
/// individual layers stay with the layer; these are the shared pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudgets {
    #[serde(default = "d_system")]
    pub system: usize,
    #[serde(default = "d_skills")]
    pub skills: usize,
    #[serde(default = "d_memory")]
    pub memory: usize,
    #[serde(default = "d_history")]
    pub history: usize,
}

impl Default for TokenBudgets {
    fn default() -> Self {
        Self {
            system: d_system(),
            skills: d_skills(),
            memory: d_memory(),
            history: d_history(),
        }
    }
}

fn d_system() -> usize {
    3_000
}
fn d_skills() -> usize {
    2_000
}
fn d_memory() -> usize {
    1_500
}
fn d_history() -> usize {
    8_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposerConfig {
    /// Ceiling on the composed system prompt as a share of the model's
    /// context window.
    #[serde(default = "d_system_share")]
    pub system_share: f64,
    #[serde(default)]
    pub budgets: TokenBudgets,
    /// Workspace files injected as the bootstrap layer, in order.
    #[serde(default = "d_bootstrap_files")]
    pub bootstrap_files: Vec<PathBuf>,
    /// Layer producer memoization TTL.
    #[serde(default = "d_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Hard cap applied to a single user turn inside the conversation
    /// window.
    #[serde(default = "d_user_turn_chars")]
    pub max_user_turn_chars: usize,
    /// Hard cap applied to a single assistant turn inside the window.
    #[serde(default = "d_assistant_turn_chars")]
    pub max_assistant_turn_chars: usize,
    /// IANA timezone rendered by the temporal layer.
    #[serde(default = "d_timezone")]
    pub timezone: String,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            system_share: d_system_share(),
            budgets: TokenBudgets::default(),
            bootstrap_files: d_bootstrap_files(),
            cache_ttl_secs: d_cache_ttl_secs(),
            max_user_turn_chars: d_user_turn_chars(),
            max_assistant_turn_chars: d_assistant_turn_chars(),
            timezone: d_timezone(),
        }
    }
}

fn d_system_share() -> f64 {
    0.4
}
fn d_bootstrap_files() -> Vec<PathBuf> {
    vec![PathBuf::from("PERSONA.md"), PathBuf::from("RULES.md")]
}
fn d_cache_ttl_secs() -> u64 {
    60
}
fn d_user_turn_chars() -> usize {
    2_000
}
fn d_assistant_turn_chars() -> usize {
    4_000
}
fn d_timezone() -> String {
    "UTC".into()
}
