use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Access control
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What happens when a sender is not in the allowlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessPolicy {
    /// Drop the message without a reply.
    #[default]
    Deny,
    /// Send a single "your request is pending" notice, then drop.
    Ask,
    /// Everyone may talk to the assistant.
    Open,
}

/// Privilege level of a caller. Ordered: `Guest < Member < Admin`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum CallerRole {
    #[default]
    Guest,
    Member,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub policy: AccessPolicy,
    /// Sender ids (`channel:from_id` or bare `from_id`) allowed to talk.
    #[serde(default)]
    pub allowlist: Vec<String>,
    /// Sender ids with admin privileges (slash commands, approvals).
    #[serde(default)]
    pub admins: Vec<String>,
    /// Inbound messages longer than this are rejected at ingress.
    #[serde(default = "d_max_message_chars")]
    pub max_message_chars: usize,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            policy: AccessPolicy::default(),
            allowlist: Vec::new(),
            admins: Vec::new(),
            max_message_chars: d_max_message_chars(),
        }
    }
}

fn d_max_message_chars() -> usize {
    8_000
}

impl AccessConfig {
    /// Resolve the caller's role. Admins are implicitly allowlisted.
    pub fn role_of(&self, channel_id: &str, from_id: &str) -> CallerRole {
        let qualified = format!("{channel_id}:{from_id}");
        if self.admins.iter().any(|a| a == from_id || a == &qualified) {
            return CallerRole::Admin;
        }
        if self.allowlist.iter().any(|a| a == from_id || a == &qualified) {
            return CallerRole::Member;
        }
        CallerRole::Guest
    }

    /// Whether this caller may start a turn at all.
    pub fn permits(&self, role: CallerRole) -> bool {
        role >= CallerRole::Member || self.policy == AccessPolicy::Open
    }
}
