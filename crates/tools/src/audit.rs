//! Append-only audit log.
//!
//! Every tool call — allowed or blocked — lands here with caller identity,
//! redacted arguments, and the outcome. One JSON line per entry; the file
//! only ever grows.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use pl_domain::error::Result;
use pl_domain::turn::ToolOutcome;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub session_key: String,
    pub caller_id: String,
    pub call_id: String,
    pub tool_name: String,
    /// Arguments with secret-bearing values replaced by digests.
    pub arguments: Value,
    pub outcome: ToolOutcome,
    pub detail: String,
    pub elapsed_ms: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Redaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn secret_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(token|secret|password|passwd|api[_-]?key|authorization|credential)")
            .expect("static regex")
    })
}

/// Replace values under secret-looking keys with a short digest so the log
/// proves *what* was passed without storing it.
pub fn redact_args(args: &Value) -> Value {
    match args {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                if secret_key_re().is_match(key) {
                    out.insert(key.clone(), Value::String(digest_of(value)));
                } else {
                    out.insert(key.clone(), redact_args(value));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_args).collect()),
        other => other.clone(),
    }
}

fn digest_of(value: &Value) -> String {
    let raw = value.to_string();
    let digest = Sha256::digest(raw.as_bytes());
    format!("sha256:{}", hex::encode(&digest[..4]))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AuditLog {
    path: PathBuf,
    // Serializes appends from concurrent tool dispatches.
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path)?;
        Ok(Self {
            path: state_path.join("audit.jsonl"),
            write_lock: Mutex::new(()),
        })
    }

    /// Append one entry. Failures are logged and swallowed — audit troubles
    /// must not break tool dispatch.
    pub fn append(&self, entry: &AuditEntry) {
        let json = match serde_json::to_string(entry) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize audit entry");
                return;
            }
        };

        let _guard = self.write_lock.lock();
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(format!("{json}\n").as_bytes()));
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "audit append failed");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
