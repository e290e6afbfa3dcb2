//! Admin commands carried in user text.
//!
//! `/stop /new /reset /compact /think /queue /model /approve /deny` —
//! parsed before anything reaches the queue, executed directly, answered
//! with a short confirmation. `/approve` and `/deny` are admin-only.

use pl_domain::config::{CallerRole, QueueMode, ThinkingLevel};
use pl_sessions::SessionKey;

use super::compact;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    Stop,
    New,
    Reset,
    Compact,
    Think(ThinkingLevel),
    Queue(QueueMode),
    Model(String),
    Approve(String),
    Deny(String),
}

impl AdminCommand {
    /// Minimum role needed to run this command.
    pub fn required_role(&self) -> CallerRole {
        match self {
            AdminCommand::Approve(_) | AdminCommand::Deny(_) => CallerRole::Admin,
            _ => CallerRole::Member,
        }
    }
}

/// Parse a potential command. `None` = not a command (plain message);
/// `Some(Err(help))` = a recognized slash with bad arguments.
pub fn parse(text: &str) -> Option<Result<AdminCommand, String>> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let mut parts = trimmed.split_whitespace();
    let head = parts.next()?;
    let arg = parts.next();

    let parsed = match head {
        "/stop" => Ok(AdminCommand::Stop),
        "/new" => Ok(AdminCommand::New),
        "/reset" => Ok(AdminCommand::Reset),
        "/compact" => Ok(AdminCommand::Compact),
        "/think" => match arg.map(|a| a.parse::<ThinkingLevel>()) {
            Some(Ok(level)) => Ok(AdminCommand::Think(level)),
            _ => Err("usage: /think {off|low|medium|high}".into()),
        },
        "/queue" => match arg.map(parse_queue_mode) {
            Some(Some(mode)) => Ok(AdminCommand::Queue(mode)),
            _ => Err("usage: /queue {collect|steer|followup|interrupt|steer-backlog}".into()),
        },
        "/model" => match arg {
            Some(name) => Ok(AdminCommand::Model(name.to_string())),
            None => Err("usage: /model <endpoint/model>".into()),
        },
        "/approve" => match arg {
            Some(id) => Ok(AdminCommand::Approve(id.to_string())),
            None => Err("usage: /approve <call-id>".into()),
        },
        "/deny" => match arg {
            Some(id) => Ok(AdminCommand::Deny(id.to_string())),
            None => Err("usage: /deny <call-id>".into()),
        },
        _ => return None, // unknown slash text flows through as a message
    };
    Some(parsed)
}

fn parse_queue_mode(s: &str) -> Option<QueueMode> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
}

/// Execute a parsed command; returns the confirmation text for the chat.
pub async fn execute(state: &AppState, key: &SessionKey, command: AdminCommand) -> String {
    let key_str = key.to_string();
    match command {
        AdminCommand::Stop => {
            if state.cancel_map.cancel(&key_str) {
                "stopping the current run".into()
            } else {
                "nothing is running".into()
            }
        }
        AdminCommand::New => {
            let next = key.next_branch();
            state.set_branch(&key.channel, &key.chat_id, next.branch.clone());
            state.layer_cache.invalidate_session(&key_str);
            format!("started a fresh conversation (branch {})", next.branch)
        }
        AdminCommand::Reset => {
            state.cancel_map.cancel(&key_str);
            state.layer_cache.invalidate_session(&key_str);
            match state.sessions.delete(key) {
                Ok(true) => "conversation history cleared".into(),
                Ok(false) => "nothing to clear".into(),
                Err(e) => {
                    tracing::warn!(session_key = %key_str, error = %e, "reset failed");
                    "could not clear the conversation, sorry".into()
                }
            }
        }
        AdminCommand::Compact => {
            let strategy = state.config.sessions.compaction.strategy;
            match compact::compact_session(state, key, strategy).await {
                Ok(true) => "history compacted".into(),
                Ok(false) => "nothing to compact yet".into(),
                Err(e) => {
                    tracing::warn!(session_key = %key_str, error = %e, "manual compaction failed");
                    "compaction failed, sorry".into()
                }
            }
        }
        AdminCommand::Think(level) => {
            update_overrides(state, key, |o| o.thinking = Some(level));
            format!("thinking level set to {level:?}").to_lowercase()
        }
        AdminCommand::Queue(mode) => {
            update_overrides(state, key, |o| o.queue_mode = Some(mode));
            format!("queue mode set to {mode:?}").to_lowercase()
        }
        AdminCommand::Model(name) => {
            let (endpoint, _) = pl_domain::config::split_model_ref(&name);
            if !state.config.providers.endpoints.contains_key(endpoint) {
                return format!("unknown endpoint '{endpoint}'");
            }
            update_overrides(state, key, |o| o.model = Some(name.clone()));
            format!("model set to {name}")
        }
        AdminCommand::Approve(id) => {
            if state.approvals.approve(&id) {
                format!("approved {id}")
            } else {
                format!("no pending approval with id {id}")
            }
        }
        AdminCommand::Deny(id) => {
            if state.approvals.deny(&id, Some("denied by user".into())) {
                format!("denied {id}")
            } else {
                format!("no pending approval with id {id}")
            }
        }
    }
}

fn update_overrides<F>(state: &AppState, key: &SessionKey, f: F)
where
    F: FnOnce(&mut pl_domain::config::SessionOverrides),
{
    let arc = state.sessions.get_or_create(key);
    let mut overrides = arc.read().overrides.clone();
    f(&mut overrides);
    state.sessions.set_overrides(key, overrides);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_not_a_command() {
        assert!(parse("hello there").is_none());
        assert!(parse("/unknownthing").is_none());
    }

    #[test]
    fn bare_commands_parse() {
        assert_eq!(parse("/stop").unwrap().unwrap(), AdminCommand::Stop);
        assert_eq!(parse("  /new  ").unwrap().unwrap(), AdminCommand::New);
        assert_eq!(parse("/reset").unwrap().unwrap(), AdminCommand::Reset);
        assert_eq!(parse("/compact").unwrap().unwrap(), AdminCommand::Compact);
    }

    #[test]
    fn argument_commands_parse() {
        assert_eq!(
            parse("/think medium").unwrap().unwrap(),
            AdminCommand::Think(ThinkingLevel::Medium)
        );
        assert_eq!(
            parse("/queue steer-backlog").unwrap().unwrap(),
            AdminCommand::Queue(QueueMode::SteerBacklog)
        );
        assert_eq!(
            parse("/model main/gpt-4o").unwrap().unwrap(),
            AdminCommand::Model("main/gpt-4o".into())
        );
        assert_eq!(
            parse("/approve 42").unwrap().unwrap(),
            AdminCommand::Approve("42".into())
        );
    }

    #[test]
    fn malformed_arguments_yield_usage() {
        assert!(parse("/think loudly").unwrap().is_err());
        assert!(parse("/queue sideways").unwrap().is_err());
        assert!(parse("/approve").unwrap().is_err());
    }

    #[test]
    fn approval_commands_need_admin() {
        assert_eq!(
            AdminCommand::Approve("x".into()).required_role(),
            CallerRole::Admin
        );
        assert_eq!(AdminCommand::Stop.required_role(), CallerRole::Member);
    }
}
