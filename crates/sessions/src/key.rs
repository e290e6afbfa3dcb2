//! Session key computation.
//!
//! A conversation is identified by `(channel, chat, branch)`. The string
//! form `channel:chat:branch` is stable for the lifetime of the
//! conversation and is what queues, lanes, and locks key on. The branch
//! defaults to `main`; `/new` rotates it so one chat can host a fresh
//! conversation without losing the old history directory.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub channel: String,
    pub chat_id: String,
    pub branch: String,
}

impl SessionKey {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            branch: branch.into(),
        }
    }

    /// Key for the default branch of a chat.
    pub fn main(channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self::new(channel, chat_id, "main")
    }

    /// Derive the next branch key (`main` → `b2`, `b2` → `b3`, ...).
    /// Used by `/new`.
    pub fn next_branch(&self) -> Self {
        let n = self
            .branch
            .strip_prefix('b')
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(1);
        Self::new(self.channel.clone(), self.chat_id.clone(), format!("b{}", n + 1))
    }

    /// Filesystem-safe directory name: sanitized key plus a short digest so
    /// distinct keys can never collide after sanitization.
    pub fn dir_name(&self) -> String {
        let full = self.to_string();
        let sanitized: String = full
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .take(48)
            .collect();
        let digest = Sha256::digest(full.as_bytes());
        format!("{sanitized}-{}", hex::encode(&digest[..4]))
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.channel, self.chat_id, self.branch)
    }
}

impl std::str::FromStr for SessionKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(channel), Some(chat), Some(branch))
                if !channel.is_empty() && !chat.is_empty() && !branch.is_empty() =>
            {
                Ok(Self::new(channel, chat, branch))
            }
            _ => Err(format!("malformed session key '{s}'")),
        }
    }
}
