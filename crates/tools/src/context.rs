//! Per-dispatch tool context.
//!
//! Handlers never hold a back-pointer to the orchestrator; everything a
//! tool may touch travels in this value, built fresh for each agent run.

use std::path::PathBuf;
use std::sync::Arc;

use pl_domain::cancel::CancelToken;
use pl_domain::config::CallerRole;
use pl_domain::memory::MemoryStore;
use pl_domain::schedule::Scheduler;

#[derive(Clone)]
pub struct ToolCtx {
    pub session_key: String,
    pub caller_id: String,
    pub caller_role: CallerRole,
    /// Containment root for every path-taking tool.
    pub workspace_root: PathBuf,
    /// Tied to the enclosing agent run; long handlers must poll it.
    pub cancel: CancelToken,
    pub memory: Arc<dyn MemoryStore>,
    pub scheduler: Arc<dyn Scheduler>,
}
