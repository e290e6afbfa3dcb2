//! Scheduler interface. Job persistence and cron evaluation are external;
//! the core registers jobs and receives due jobs as agent turns on the
//! `cron` lane.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What to run when a job fires: a prompt delivered to a named chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub channel_id: String,
    pub chat_id: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: String,
    pub cron_expr: String,
    pub spec: JobSpec,
}

#[async_trait::async_trait]
pub trait Scheduler: Send + Sync {
    async fn register_job(&self, cron_expr: &str, spec: JobSpec) -> Result<String>;
    async fn list(&self) -> Result<Vec<JobInfo>>;
    async fn remove(&self, id: &str) -> Result<bool>;
}
