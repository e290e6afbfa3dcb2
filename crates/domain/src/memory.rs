//! Long-term memory interface.
//!
//! The core never indexes or embeds anything itself; it saves facts, runs
//! ranked searches, and appends daily-log entries through this trait.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One ranked search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHit {
    pub key: String,
    pub content: String,
    pub score: f32,
}

#[async_trait::async_trait]
pub trait MemoryStore: Send + Sync {
    async fn save_fact(&self, key: &str, value: &str) -> Result<()>;

    async fn search(&self, query: &str, k: usize) -> Result<Vec<MemoryHit>>;

    async fn daily_log(&self, date: chrono::NaiveDate, content: &str) -> Result<()>;

    /// Monotonic counter bumped on every write. The prompt composer keys its
    /// memory-layer cache on this instead of wall-clock time.
    fn epoch(&self) -> u64;
}
