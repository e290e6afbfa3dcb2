use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use super::CallerRole;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool execution & guard
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Guard rules. This whole struct is hot-reloadable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Regexes matched against command-like string arguments. A match
    /// denies the call.
    #[serde(default = "d_denied_patterns")]
    pub denied_patterns: Vec<String>,
    /// Minimum caller role per tool. Tools not listed default to `Member`.
    #[serde(default)]
    pub min_role: HashMap<String, CallerRole>,
    /// Per-caller tool-call ceiling within the rate window.
    #[serde(default = "d_rate_limit")]
    pub rate_limit_per_min: u32,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            denied_patterns: d_denied_patterns(),
            min_role: HashMap::new(),
            rate_limit_per_min: d_rate_limit(),
        }
    }
}

fn d_denied_patterns() -> Vec<String> {
    vec![
        r"rm\s+-rf\s+/(?:\s|$)".into(),
        r"mkfs\.".into(),
        r"dd\s+if=.*of=/dev/".into(),
        r":\(\)\s*\{.*\};\s*:".into(),
        r"curl[^|]*\|\s*(?:ba)?sh".into(),
        r"wget[^|]*\|\s*(?:ba)?sh".into(),
        r">\s*/dev/sd[a-z]".into(),
        r"chmod\s+-R\s+777\s+/(?:\s|$)".into(),
    ]
}
fn d_rate_limit() -> u32 {
    60
}

/// Loop-detector escalation thresholds (consecutive repeated signatures).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default = "d_warn_after")]
    pub warn_after: u32,
    #[serde(default = "d_critical_after")]
    pub critical_after: u32,
    #[serde(default = "d_break_after")]
    pub break_after: u32,
    /// Tools that poll external state; repeats of these with identical
    /// arguments are flagged earlier.
    #[serde(default = "d_known_poll_tools")]
    pub known_poll_tools: Vec<String>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            warn_after: d_warn_after(),
            critical_after: d_critical_after(),
            break_after: d_break_after(),
            known_poll_tools: d_known_poll_tools(),
        }
    }
}

fn d_warn_after() -> u32 {
    8
}
fn d_critical_after() -> u32 {
    15
}
fn d_break_after() -> u32 {
    25
}
fn d_known_poll_tools() -> Vec<String> {
    vec!["list_dir".into(), "memory_search".into()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Containment root: every path-taking tool call must resolve inside.
    #[serde(default = "d_workspace_root")]
    pub workspace_root: PathBuf,
    /// Concurrency cap for non-stateful tool calls within one agent turn.
    #[serde(default = "d_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "d_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// How long an approval request may wait before defaulting to deny.
    #[serde(default = "d_approval_timeout_secs")]
    pub approval_timeout_secs: u64,
    /// Tool observations longer than this are truncated before commit.
    #[serde(default = "d_max_result_chars")]
    pub max_result_chars: usize,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub loops: LoopConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            workspace_root: d_workspace_root(),
            max_parallel: d_max_parallel(),
            call_timeout_secs: d_call_timeout_secs(),
            approval_timeout_secs: d_approval_timeout_secs(),
            max_result_chars: d_max_result_chars(),
            guard: GuardConfig::default(),
            loops: LoopConfig::default(),
        }
    }
}

fn d_workspace_root() -> PathBuf {
    PathBuf::from("./workspace")
}
fn d_max_parallel() -> usize {
    4
}
fn d_call_timeout_secs() -> u64 {
    120
}
fn d_approval_timeout_secs() -> u64 {
    120
}
fn d_max_result_chars() -> usize {
    16_000
}
