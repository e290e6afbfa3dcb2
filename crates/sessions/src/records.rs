//! Append-only persistence for one session.
//!
//! Layout per session directory:
//! - `records.jsonl` — one JSON record per mutation, append-only
//! - `meta.json` — small snapshot (facts, overrides, usage, timestamps)
//!   written via temp-file + rename after each mutation
//!
//! Replay folds the record log back into a [`Session`]. A torn trailing
//! line (interrupted append) is dropped with a warning; any other corrupt
//! record aborts the replay of that session — and only that session.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pl_domain::config::SessionOverrides;
use pl_domain::error::{Error, Result};
use pl_domain::stream::Usage;
use pl_domain::trace::TraceEvent;
use pl_domain::turn::Turn;

use crate::key::SessionKey;
use crate::session::Session;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One persisted mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum SessionRecord {
    Turn { turn: Turn },
    Fact { key: String, value: String },
    Skills { active: Vec<String> },
    Overrides { overrides: SessionOverrides },
    Usage { usage: Usage },
    /// History surgery: keep the newest `kept` turns, prepend a synthetic
    /// summary turn when `summary` is non-empty.
    Compaction {
        summary: String,
        turns_compacted: usize,
        kept: usize,
    },
}

/// Sidecar snapshot. Everything except the turn list, so a listing never
/// has to replay a log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub key: String,
    pub facts: BTreeMap<String, String>,
    pub active_skills: BTreeSet<String>,
    pub overrides: SessionOverrides,
    pub usage: Usage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turns: usize,
}

impl SessionMeta {
    pub fn of(session: &Session) -> Self {
        Self {
            key: session.key.to_string(),
            facts: session.facts.clone(),
            active_skills: session.active_skills.clone(),
            overrides: session.overrides.clone(),
            usage: session.usage,
            created_at: session.created_at,
            updated_at: session.updated_at,
            turns: session.history.len(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Log IO
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const RECORDS_FILE: &str = "records.jsonl";
const META_FILE: &str = "meta.json";

pub fn records_path(dir: &Path) -> PathBuf {
    dir.join(RECORDS_FILE)
}

/// Append records to a session's log. Each record is one line, written in a
/// single `write_all` so a crash can tear at most the final line.
pub fn append(dir: &Path, key: &SessionKey, records: &[SessionRecord]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)?;

    let mut buf = String::new();
    for record in records {
        let json = serde_json::to_string(record)
            .map_err(|e| Error::Persistence(format!("serializing record: {e}")))?;
        buf.push_str(&json);
        buf.push('\n');
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(records_path(dir))?;
    file.write_all(buf.as_bytes())?;

    TraceEvent::RecordAppend {
        session_key: key.to_string(),
        records: records.len(),
    }
    .emit();

    Ok(())
}

/// Read a session's record log back.
///
/// A malformed final line is treated as a torn append and dropped with a
/// warning. A malformed record anywhere else poisons the log and fails the
/// replay.
pub fn read_log(dir: &Path) -> Result<Vec<SessionRecord>> {
    let path = records_path(dir);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let raw = std::fs::read_to_string(&path)?;
    let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();

    let mut records = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        match serde_json::from_str::<SessionRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) if i == lines.len() - 1 => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "dropping torn trailing record"
                );
            }
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "corrupt record at line {} of {}: {e}",
                    i + 1,
                    path.display()
                )));
            }
        }
    }
    Ok(records)
}

/// Write the metadata snapshot atomically (temp file + rename).
pub fn write_meta(dir: &Path, meta: &SessionMeta) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let json = serde_json::to_string_pretty(meta)
        .map_err(|e| Error::Persistence(format!("serializing meta: {e}")))?;

    let tmp = dir.join(format!(".{META_FILE}.tmp"));
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, dir.join(META_FILE))?;
    Ok(())
}

pub fn read_meta(dir: &Path) -> Result<Option<SessionMeta>> {
    let path = dir.join(META_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)?;
    let meta = serde_json::from_str(&raw)
        .map_err(|e| Error::Persistence(format!("corrupt meta at {}: {e}", path.display())))?;
    Ok(Some(meta))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Replay
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fold a record log into a session.
pub fn rebuild(key: SessionKey, records: Vec<SessionRecord>) -> Session {
    let mut session = Session::new(key);

    for record in records {
        match record {
            SessionRecord::Turn { turn } => {
                session.updated_at = turn.at();
                session.history.push(turn);
            }
            SessionRecord::Fact { key, value } => {
                session.facts.insert(key, value);
            }
            SessionRecord::Skills { active } => {
                session.active_skills = active.into_iter().collect();
            }
            SessionRecord::Overrides { overrides } => {
                session.overrides = overrides;
            }
            SessionRecord::Usage { usage } => {
                session.usage.accumulate(&usage);
            }
            SessionRecord::Compaction {
                summary,
                turns_compacted,
                kept,
            } => {
                apply_compaction_record(&mut session, &summary, turns_compacted, kept);
            }
        }
    }

    session
}

/// Apply the surgery a `Compaction` record describes: retain the newest
/// `kept` turns and, when a summary exists, prepend it as a synthetic
/// system turn.
pub fn apply_compaction_record(
    session: &mut Session,
    summary: &str,
    turns_compacted: usize,
    kept: usize,
) {
    let len = session.history.len();
    let keep_from = len.saturating_sub(kept);
    let mut new_history = Vec::with_capacity(kept + 1);
    if !summary.is_empty() {
        new_history.push(Turn::summary(summary, turns_compacted));
    }
    new_history.extend(session.history.drain(keep_from..));
    session.history = new_history;
    session.updated_at = Utc::now();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn key() -> SessionKey {
        SessionKey::main("test", "chat1")
    }

    #[test]
    fn append_and_read_roundtrip() {
        let tmp = dir();
        let records = vec![
            SessionRecord::Turn {
                turn: Turn::user("hello"),
            },
            SessionRecord::Fact {
                key: "name".into(),
                value: "Ada".into(),
            },
        ];
        append(tmp.path(), &key(), &records).unwrap();
        let back = read_log(tmp.path()).unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn torn_trailing_line_is_dropped() {
        let tmp = dir();
        append(
            tmp.path(),
            &key(),
            &[SessionRecord::Turn {
                turn: Turn::user("ok"),
            }],
        )
        .unwrap();
        // Simulate a crash mid-append.
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(records_path(tmp.path()))
            .unwrap();
        file.write_all(b"{\"record\":\"turn\",\"turn\":{\"kind\"")
            .unwrap();

        let records = read_log(tmp.path()).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn corrupt_mid_log_fails_replay() {
        let tmp = dir();
        std::fs::create_dir_all(tmp.path()).unwrap();
        std::fs::write(
            records_path(tmp.path()),
            "not json at all\n{\"record\":\"fact\",\"key\":\"a\",\"value\":\"b\"}\n",
        )
        .unwrap();
        assert!(matches!(
            read_log(tmp.path()),
            Err(Error::Persistence(_))
        ));
    }

    #[test]
    fn rebuild_replays_mutations_in_order() {
        let records = vec![
            SessionRecord::Turn {
                turn: Turn::user("hello"),
            },
            SessionRecord::Turn {
                turn: Turn::assistant("hi"),
            },
            SessionRecord::Fact {
                key: "city".into(),
                value: "Lyon".into(),
            },
            SessionRecord::Usage {
                usage: Usage {
                    prompt_tokens: 10,
                    completion_tokens: 3,
                    cached_tokens: 0,
                },
            },
        ];
        let session = rebuild(key(), records);
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.facts.get("city").unwrap(), "Lyon");
        assert_eq!(session.usage.total(), 13);
    }

    #[test]
    fn compaction_record_replays_identically() {
        let mut records: Vec<SessionRecord> = (0..10)
            .map(|i| SessionRecord::Turn {
                turn: Turn::user(format!("msg {i}")),
            })
            .collect();
        records.push(SessionRecord::Compaction {
            summary: "they counted to ten".into(),
            turns_compacted: 8,
            kept: 2,
        });

        let session = rebuild(key(), records);
        assert_eq!(session.history.len(), 3); // summary + 2 kept
        assert!(session.history[0].is_summary());
        assert_eq!(session.history[2].text(), "msg 9");
    }

    #[test]
    fn meta_snapshot_roundtrip() {
        let tmp = dir();
        let mut session = Session::new(key());
        session.set_fact("lang", "fr");
        let meta = SessionMeta::of(&session);
        write_meta(tmp.path(), &meta).unwrap();
        let back = read_meta(tmp.path()).unwrap().unwrap();
        assert_eq!(back.key, session.key.to_string());
        assert_eq!(back.facts.get("lang").unwrap(), "fr");
        // No temp file left behind.
        assert!(!tmp.path().join(".meta.json.tmp").exists());
    }
}
