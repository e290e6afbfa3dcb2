use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pl_domain::config::SessionOverrides;
use pl_domain::stream::Usage;
use pl_domain::turn::Turn;

use crate::key::SessionKey;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-conversation state. Owned exclusively by the [`crate::SessionStore`];
/// everything else reads it under the store's per-session lock.
///
/// History is append-only except through compaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub history: Vec<Turn>,
    /// Small free-form key/value facts learned about this conversation.
    pub facts: BTreeMap<String, String>,
    pub active_skills: BTreeSet<String>,
    pub overrides: SessionOverrides,
    /// Cumulative token usage across the session's lifetime.
    pub usage: Usage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(key: SessionKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            history: Vec::new(),
            facts: BTreeMap::new(),
            active_skills: BTreeSet::new(),
            overrides: SessionOverrides::default(),
            usage: Usage::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn append_turn(&mut self, turn: Turn) {
        self.history.push(turn);
        self.updated_at = Utc::now();
    }

    pub fn set_fact(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.facts.insert(key.into(), value.into());
        self.updated_at = Utc::now();
    }

    pub fn record_usage(&mut self, usage: &Usage) {
        self.usage.accumulate(usage);
        self.updated_at = Utc::now();
    }

    /// Number of user turns in the live history (compaction counts these).
    pub fn user_turn_count(&self) -> usize {
        self.history.iter().filter(|t| t.is_user()).count()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            key: self.key.to_string(),
            turns: self.history.len(),
            facts: self.facts.len(),
            prompt_tokens: self.usage.prompt_tokens,
            completion_tokens: self.usage.completion_tokens,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Cheap listing row for admin surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub key: String,
    pub turns: usize,
    pub facts: usize,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_roundtrip_preserves_everything() {
        let mut session = Session::new(SessionKey::main("a", "x"));
        session.append_turn(Turn::user("hello"));
        session.append_turn(Turn::assistant("hi there"));
        session.set_fact("name", "Ada");
        session.active_skills.insert("notes".into());
        session.record_usage(&Usage {
            prompt_tokens: 10,
            completion_tokens: 3,
            cached_tokens: 0,
        });

        let bytes = serde_json::to_vec(&session).unwrap();
        let back: Session = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn usage_is_cumulative() {
        let mut session = Session::new(SessionKey::main("a", "x"));
        let usage = Usage {
            prompt_tokens: 10,
            completion_tokens: 3,
            cached_tokens: 0,
        };
        session.record_usage(&usage);
        session.record_usage(&usage);
        assert_eq!(session.usage.total(), 26);
    }

    #[test]
    fn user_turn_count_ignores_other_kinds() {
        let mut session = Session::new(SessionKey::main("a", "x"));
        session.append_turn(Turn::user("one"));
        session.append_turn(Turn::assistant("reply"));
        session.append_turn(Turn::summary("old stuff", 4));
        session.append_turn(Turn::user("two"));
        assert_eq!(session.user_turn_count(), 2);
    }
}
