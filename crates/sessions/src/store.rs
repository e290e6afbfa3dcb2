//! Session store.
//!
//! Owns every [`Session`]. Hot sessions live in memory behind per-session
//! RW locks; cold ones are reloaded from their record logs on demand.
//! Every mutation goes through the store so the append-log and metadata
//! snapshot stay in lockstep with memory.
//!
//! Persistence failures are logged and swallowed — a session must keep
//! working in memory even when the disk misbehaves.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use pl_domain::config::{CompactionStrategy, SessionOverrides};
use pl_domain::error::{Error, Result};
use pl_domain::stream::Usage;
use pl_domain::trace::TraceEvent;
use pl_domain::turn::Turn;

use crate::compact;
use crate::key::SessionKey;
use crate::records::{self, SessionMeta, SessionRecord};
use crate::session::{Session, SessionSummary};

struct Entry {
    session: Arc<RwLock<Session>>,
    last_access: Instant,
}

/// In-memory front of the per-session record logs.
pub struct SessionStore {
    base_dir: PathBuf,
    sessions: RwLock<HashMap<String, Entry>>,
}

impl SessionStore {
    /// Open (or create) the store under `state_path/sessions`.
    pub fn new(state_path: &Path) -> Result<Self> {
        let base_dir = state_path.join("sessions");
        std::fs::create_dir_all(&base_dir)?;

        let existing = std::fs::read_dir(&base_dir)
            .map(|it| it.filter_map(|e| e.ok()).filter(|e| e.path().is_dir()).count())
            .unwrap_or(0);

        tracing::info!(
            sessions_on_disk = existing,
            path = %base_dir.display(),
            "session store ready"
        );

        Ok(Self {
            base_dir,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    fn dir_for(&self, key: &SessionKey) -> PathBuf {
        self.base_dir.join(key.dir_name())
    }

    // ── Lookup ─────────────────────────────────────────────────────

    /// Resolve or lazily create a session. Cold sessions are replayed from
    /// disk; a corrupt log is quarantined and the session starts fresh
    /// (other sessions are unaffected).
    pub fn get_or_create(&self, key: &SessionKey) -> Arc<RwLock<Session>> {
        let key_str = key.to_string();

        // Fast path.
        {
            let mut sessions = self.sessions.write();
            if let Some(entry) = sessions.get_mut(&key_str) {
                entry.last_access = Instant::now();
                return entry.session.clone();
            }
        }

        // Slow path: load from disk or create.
        let (session, is_new) = self.load_or_new(key);
        let arc = Arc::new(RwLock::new(session));

        let mut sessions = self.sessions.write();
        // Another caller may have raced us; the first insert wins.
        let entry = sessions.entry(key_str.clone()).or_insert_with(|| {
            TraceEvent::SessionResolved {
                session_key: key_str.clone(),
                is_new,
            }
            .emit();
            Entry {
                session: arc,
                last_access: Instant::now(),
            }
        });
        entry.last_access = Instant::now();
        entry.session.clone()
    }

    /// Look up a session without creating it. Cold sessions with a
    /// directory on disk are loaded on demand.
    pub fn get(&self, key: &SessionKey) -> Option<Arc<RwLock<Session>>> {
        let key_str = key.to_string();
        {
            let mut sessions = self.sessions.write();
            if let Some(entry) = sessions.get_mut(&key_str) {
                entry.last_access = Instant::now();
                return Some(entry.session.clone());
            }
        }
        if !self.dir_for(key).exists() {
            return None;
        }
        Some(self.get_or_create(key))
    }

    fn load_or_new(&self, key: &SessionKey) -> (Session, bool) {
        let dir = self.dir_for(key);
        if !dir.exists() {
            return (Session::new(key.clone()), true);
        }

        match records::read_log(&dir) {
            Ok(log) if log.is_empty() => (Session::new(key.clone()), true),
            Ok(log) => (records::rebuild(key.clone(), log), false),
            Err(e) => {
                // Corrupt log: quarantine it so the next append starts a
                // clean file, keep the bytes around for operators.
                tracing::error!(
                    session_key = %key,
                    error = %e,
                    "session log corrupt; quarantining and starting fresh"
                );
                let corrupt = dir.join("records.jsonl.corrupt");
                if let Err(re) = std::fs::rename(records::records_path(&dir), &corrupt) {
                    tracing::warn!(error = %re, "failed to quarantine corrupt log");
                }
                (Session::new(key.clone()), true)
            }
        }
    }

    // ── Mutation (always through here, so the log stays in sync) ───

    fn commit<F>(&self, key: &SessionKey, record: SessionRecord, mutate: F)
    where
        F: FnOnce(&mut Session),
    {
        let arc = self.get_or_create(key);
        let meta = {
            let mut session = arc.write();
            mutate(&mut session);
            SessionMeta::of(&session)
        };

        let dir = self.dir_for(key);
        if let Err(e) = records::append(&dir, key, std::slice::from_ref(&record)) {
            tracing::warn!(session_key = %key, error = %e, "record append failed");
        }
        if let Err(e) = records::write_meta(&dir, &meta) {
            tracing::warn!(session_key = %key, error = %e, "meta snapshot failed");
        }
    }

    pub fn commit_turn(&self, key: &SessionKey, turn: Turn) {
        self.commit(key, SessionRecord::Turn { turn: turn.clone() }, |s| {
            s.append_turn(turn)
        });
    }

    pub fn set_fact(&self, key: &SessionKey, fact_key: &str, value: &str) {
        self.commit(
            key,
            SessionRecord::Fact {
                key: fact_key.into(),
                value: value.into(),
            },
            |s| s.set_fact(fact_key, value),
        );
    }

    pub fn set_skills(&self, key: &SessionKey, active: Vec<String>) {
        self.commit(
            key,
            SessionRecord::Skills {
                active: active.clone(),
            },
            |s| {
                s.active_skills = active.into_iter().collect();
                s.updated_at = chrono::Utc::now();
            },
        );
    }

    pub fn set_overrides(&self, key: &SessionKey, overrides: SessionOverrides) {
        self.commit(
            key,
            SessionRecord::Overrides {
                overrides: overrides.clone(),
            },
            |s| {
                s.overrides = overrides;
                s.updated_at = chrono::Utc::now();
            },
        );
    }

    pub fn record_usage(&self, key: &SessionKey, usage: &Usage) {
        let usage = *usage;
        self.commit(key, SessionRecord::Usage { usage }, |s| {
            s.record_usage(&usage)
        });
    }

    /// Apply compaction surgery: keep the newest `kept` turns and prepend
    /// `summary` (when non-empty) as a synthetic system turn. The matching
    /// record makes replay deterministic.
    pub fn apply_compaction(
        &self,
        key: &SessionKey,
        strategy: CompactionStrategy,
        summary: &str,
        turns_compacted: usize,
        kept: usize,
    ) {
        let turns_before = self
            .get(key)
            .map(|arc| arc.read().history.len())
            .unwrap_or(0);

        self.commit(
            key,
            SessionRecord::Compaction {
                summary: summary.into(),
                turns_compacted,
                kept,
            },
            |s| records::apply_compaction_record(s, summary, turns_compacted, kept),
        );

        let turns_after = self
            .get(key)
            .map(|arc| arc.read().history.len())
            .unwrap_or(0);
        TraceEvent::CompactionRun {
            session_key: key.to_string(),
            strategy: format!("{strategy:?}").to_lowercase(),
            turns_before,
            turns_after,
        }
        .emit();
    }

    /// Model-free compaction (`truncate` / `sliding`). Returns `false` for
    /// the summarize strategy — that one needs the agent runner.
    pub fn compact_local(
        &self,
        key: &SessionKey,
        strategy: CompactionStrategy,
        threshold: usize,
        sliding_keep: usize,
    ) -> bool {
        let Some(arc) = self.get(key) else {
            return false;
        };
        let len = arc.read().history.len();

        let kept = match strategy {
            CompactionStrategy::Truncate => compact::truncate_keep(len, threshold),
            CompactionStrategy::Sliding => sliding_keep.min(len),
            CompactionStrategy::Summarize => return false,
        };
        if kept >= len {
            return false;
        }
        self.apply_compaction(key, strategy, "", len - kept, kept);
        true
    }

    // ── Listing / admin ────────────────────────────────────────────

    /// Summaries of every session: loaded ones from memory, cold ones from
    /// their metadata snapshots.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut out = Vec::new();
        let mut seen: Vec<String> = Vec::new();

        {
            let sessions = self.sessions.read();
            for entry in sessions.values() {
                let session = entry.session.read();
                seen.push(session.key.dir_name());
                out.push(session.summary());
            }
        }

        if let Ok(read_dir) = std::fs::read_dir(&self.base_dir) {
            for dir_entry in read_dir.filter_map(|e| e.ok()) {
                let name = dir_entry.file_name().to_string_lossy().to_string();
                if seen.contains(&name) || !dir_entry.path().is_dir() {
                    continue;
                }
                match records::read_meta(&dir_entry.path()) {
                    Ok(Some(meta)) => out.push(SessionSummary {
                        key: meta.key,
                        turns: meta.turns,
                        facts: meta.facts.len(),
                        prompt_tokens: meta.usage.prompt_tokens,
                        completion_tokens: meta.usage.completion_tokens,
                        created_at: meta.created_at,
                        updated_at: meta.updated_at,
                    }),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(dir = %name, error = %e, "unreadable session meta")
                    }
                }
            }
        }

        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        out
    }

    /// Key-prefix search over session summaries.
    pub fn find_by_prefix(&self, prefix: &str) -> Vec<SessionSummary> {
        self.list()
            .into_iter()
            .filter(|s| s.key.starts_with(prefix))
            .collect()
    }

    /// Remove a session from memory and disk.
    pub fn delete(&self, key: &SessionKey) -> Result<bool> {
        self.sessions.write().remove(&key.to_string());
        let dir = self.dir_for(key);
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir)?;
        Ok(true)
    }

    /// The session's record log, byte for byte. Replaying it reconstructs
    /// the full session.
    pub fn export(&self, key: &SessionKey) -> Result<Vec<u8>> {
        let path = records::records_path(&self.dir_for(key));
        if !path.exists() {
            return Err(Error::Validation(format!("no session '{key}'")));
        }
        Ok(std::fs::read(path)?)
    }

    // ── Maintenance ────────────────────────────────────────────────

    /// Evict sessions idle past the TTL. Sessions with an outstanding
    /// handle (an active run) are skipped.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|key_str, entry| {
            let idle = entry.last_access.elapsed();
            if idle < ttl || Arc::strong_count(&entry.session) > 1 {
                return true;
            }
            TraceEvent::SessionEvicted {
                session_key: key_str.clone(),
                idle_secs: idle.as_secs(),
            }
            .emit();
            false
        });
        before - sessions.len()
    }

    /// Number of sessions currently resident in memory.
    pub fn resident_count(&self) -> usize {
        self.sessions.read().len()
    }
}
