mod access;
mod composer;
mod lanes;
mod providers;
mod queue;
mod reload;
mod runtime;
mod sessions;
mod tools;

pub use access::*;
pub use composer::*;
pub use lanes::*;
pub use providers::*;
pub use queue::*;
pub use reload::*;
pub use runtime::*;
pub use sessions::*;
pub use tools::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub composer: ComposerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub lanes: LanesConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Attach the built-in console channel (local development).
    #[serde(default)]
    pub console: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

fn err(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Error,
        field: field.into(),
        message: message.into(),
    }
}

fn warn(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Warning,
        field: field.into(),
        message: message.into(),
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.providers.primary.is_empty() {
            errors.push(err("providers.primary", "primary model must be set"));
        }
        for model in std::iter::once(&self.providers.primary).chain(&self.providers.fallbacks) {
            if !model.is_empty() {
                let (endpoint, _) = split_model_ref(model);
                if !self.providers.endpoints.contains_key(endpoint) {
                    errors.push(err(
                        "providers",
                        format!("model '{model}' references unknown endpoint '{endpoint}'"),
                    ));
                }
            }
        }
        if self.providers.max_attempts == 0 {
            errors.push(err("providers.max_attempts", "must be at least 1"));
        }

        if self.composer.system_share <= 0.0 || self.composer.system_share > 0.5 {
            errors.push(err(
                "composer.system_share",
                "must be in (0.0, 0.5]; the system prompt is capped well below the context window",
            ));
        }

        if self.queue.max_pending == 0 {
            errors.push(err("queue.max_pending", "must be at least 1"));
        }

        if self.tools.max_parallel == 0 {
            errors.push(err("tools.max_parallel", "must be at least 1"));
        }
        for pattern in &self.tools.guard.denied_patterns {
            if let Err(e) = regex_check(pattern) {
                errors.push(err(
                    "tools.guard.denied_patterns",
                    format!("invalid regex '{pattern}': {e}"),
                ));
            }
        }
        if self.tools.workspace_root.as_os_str().is_empty() {
            errors.push(err("tools.workspace_root", "workspace root must be set"));
        }

        if self.sessions.max_turns < 8 {
            errors.push(warn(
                "sessions.max_turns",
                "very small compaction threshold; preventive compaction will fire constantly",
            ));
        }

        if self.runtime.max_turns_per_request == 0 {
            errors.push(err("runtime.max_turns_per_request", "must be at least 1"));
        }

        errors
    }
}

/// Split a `"endpoint/model"` reference into its two components. A reference
/// without `/` names the endpoint and leaves the model to the endpoint's
/// default.
pub fn split_model_ref(model_ref: &str) -> (&str, &str) {
    match model_ref.split_once('/') {
        Some((endpoint, model)) => (endpoint, model),
        None => (model_ref, ""),
    }
}

// Compiled only for validation; the guard compiles its own RegexSet once at
// startup. Kept as a free function so validation does not depend on the
// tools crate.
fn regex_check(pattern: &str) -> std::result::Result<(), String> {
    // A pattern the size of a config line compiles in microseconds; no need
    // to cache here.
    match regex_syntax_check(pattern) {
        true => Ok(()),
        false => Err("unbalanced or malformed pattern".into()),
    }
}

fn regex_syntax_check(pattern: &str) -> bool {
    // Cheap structural sanity check without pulling the regex crate into the
    // domain crate: balanced groups/classes and no trailing escape.
    let mut depth = 0i32;
    let mut in_class = false;
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if chars.next().is_none() {
                    return false;
                }
            }
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '(' if !in_class => depth += 1,
            ')' if !in_class => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return false;
        }
    }
    depth == 0 && !in_class
}
