//! Committed conversation units.
//!
//! A [`Turn`] is immutable once appended to a session's history. Compaction
//! is the only operation allowed to remove turns, and it replaces the removed
//! range with a single synthetic [`Turn::Summary`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::convo::ToolCall;

/// Outcome of one tool call, as recorded in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Ok,
    Failed,
    Denied,
    TimedOut,
}

/// The result of a tool call, appended to history and visible to the model
/// on the next turn. Content is truncated at record time; the full output
/// only ever lives in the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolObservation {
    pub call_id: String,
    pub tool_name: String,
    /// Fingerprint of the arguments (`name:hash8`), not the arguments
    /// themselves — raw arguments may hold secrets.
    pub args_fingerprint: String,
    pub content: String,
    pub elapsed_ms: u64,
    pub outcome: ToolOutcome,
}

impl ToolObservation {
    pub fn is_error(&self) -> bool {
        !matches!(self.outcome, ToolOutcome::Ok)
    }
}

/// One committed unit of conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    User {
        text: String,
        at: DateTime<Utc>,
    },
    Assistant {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
        at: DateTime<Utc>,
    },
    Tool {
        observation: ToolObservation,
        at: DateTime<Utc>,
    },
    /// Synthetic system turn produced by compaction.
    Summary {
        text: String,
        turns_compacted: usize,
        at: DateTime<Utc>,
    },
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Turn::User {
            text: text.into(),
            at: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Turn::Assistant {
            text: text.into(),
            tool_calls: Vec::new(),
            at: Utc::now(),
        }
    }

    pub fn assistant_with_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Turn::Assistant {
            text: text.into(),
            tool_calls,
            at: Utc::now(),
        }
    }

    pub fn tool(observation: ToolObservation) -> Self {
        Turn::Tool {
            observation,
            at: Utc::now(),
        }
    }

    pub fn summary(text: impl Into<String>, turns_compacted: usize) -> Self {
        Turn::Summary {
            text: text.into(),
            turns_compacted,
            at: Utc::now(),
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Turn::User { at, .. }
            | Turn::Assistant { at, .. }
            | Turn::Tool { at, .. }
            | Turn::Summary { at, .. } => *at,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Turn::User { .. })
    }

    pub fn is_summary(&self) -> bool {
        matches!(self, Turn::Summary { .. })
    }

    /// Plain-text rendering used when feeding history back to the model and
    /// when building compaction summaries.
    pub fn text(&self) -> &str {
        match self {
            Turn::User { text, .. }
            | Turn::Assistant { text, .. }
            | Turn::Summary { text, .. } => text,
            Turn::Tool { observation, .. } => &observation.content,
        }
    }
}
