//! Pre-dispatch guard.
//!
//! Denies a call when: the caller's role is below the tool's minimum; a
//! command-like argument matches a dangerous pattern; a named path escapes
//! the workspace; or the caller exceeded its rate window. The rule set is
//! hot-reloadable — live dispatches read the current snapshot through one
//! pointer swap.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use regex::RegexSet;
use serde_json::Value;

use pl_domain::config::{CallerRole, GuardConfig};
use pl_domain::convo::ToolCall;
use pl_domain::error::{Error, Result};

use crate::containment;
use crate::context::ToolCtx;

/// Argument keys treated as command text (matched against dangerous
/// patterns).
const COMMAND_KEYS: &[&str] = &["command", "cmd", "script", "shell"];

/// Argument keys treated as filesystem paths (containment-checked).
const PATH_KEYS: &[&str] = &["path", "file", "dir", "directory", "target", "source"];

struct CompiledRules {
    config: GuardConfig,
    denied: RegexSet,
}

pub struct Guard {
    rules: RwLock<Arc<CompiledRules>>,
    /// caller id → recent call instants (rate window).
    calls: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl Guard {
    pub fn new(config: GuardConfig) -> Result<Self> {
        Ok(Self {
            rules: RwLock::new(Arc::new(Self::compile(config)?)),
            calls: Mutex::new(HashMap::new()),
        })
    }

    fn compile(config: GuardConfig) -> Result<CompiledRules> {
        let denied = RegexSet::new(&config.denied_patterns)
            .map_err(|e| Error::Config(format!("guard.denied_patterns: {e}")))?;
        Ok(CompiledRules { config, denied })
    }

    /// Swap in a new rule set (hot reload). Invalid patterns keep the old
    /// rules in place.
    pub fn reload(&self, config: GuardConfig) -> Result<()> {
        let compiled = Self::compile(config)?;
        *self.rules.write() = Arc::new(compiled);
        tracing::info!("guard rules reloaded");
        Ok(())
    }

    /// Check one call. `Ok(())` means dispatch may proceed; `Err` carries
    /// the denial reason the model will see.
    pub fn check(&self, call: &ToolCall, ctx: &ToolCtx) -> Result<()> {
        let rules = self.rules.read().clone();

        // 1. Role floor.
        let required = rules
            .config
            .min_role
            .get(&call.tool_name)
            .copied()
            .unwrap_or(CallerRole::Member);
        if ctx.caller_role < required {
            return Err(Error::ToolDenied(format!(
                "caller role {:?} below required {:?} for '{}'",
                ctx.caller_role, required, call.tool_name
            )));
        }

        // 2. Dangerous command patterns.
        if let Some(obj) = call.arguments.as_object() {
            for key in COMMAND_KEYS {
                if let Some(Value::String(text)) = obj.get(*key) {
                    if rules.denied.is_match(text) {
                        return Err(Error::ToolDenied(format!(
                            "command matches a blocked pattern ({key})"
                        )));
                    }
                }
            }

            // 3. Workspace containment for every path-like argument.
            for key in PATH_KEYS {
                if let Some(Value::String(path)) = obj.get(*key) {
                    containment::contain(&ctx.workspace_root, path)
                        .map_err(|_| Error::ToolDenied("path escapes workspace".into()))?;
                }
            }
        }

        // 4. Rate limit per caller.
        self.check_rate(&ctx.caller_id, rules.config.rate_limit_per_min)?;

        Ok(())
    }

    fn check_rate(&self, caller_id: &str, limit: u32) -> Result<()> {
        let now = Instant::now();
        let window = Duration::from_secs(60);
        let mut calls = self.calls.lock();
        let recent = calls.entry(caller_id.to_string()).or_default();

        while recent.front().is_some_and(|t| now - *t > window) {
            recent.pop_front();
        }
        if recent.len() >= limit as usize {
            return Err(Error::ToolDenied(format!(
                "rate limit exceeded ({limit} tool calls per minute)"
            )));
        }
        recent.push_back(now);
        Ok(())
    }
}
