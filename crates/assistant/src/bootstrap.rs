//! Staged construction of the application state.
//!
//! Each stage logs what it brought up; failures classify into the startup
//! exit codes (64 config invalid, 69 dependency unavailable).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use pl_composer::cache::LayerCache;
use pl_domain::config::{Config, ConfigSeverity, ReloadableConfig};
use pl_domain::error::Result;
use pl_domain::memory::{MemoryHit, MemoryStore};
use pl_domain::schedule::{JobInfo, JobSpec, Scheduler};
use pl_domain::secrets::SecretStore;
use pl_providers::{ModelClient, ProviderRegistry};
use pl_sessions::SessionStore;
use pl_tools::builtin::register_builtins;
use pl_tools::{ApprovalBroker, ApprovalRequest, Guard, ToolExecutor, ToolRegistry};

use crate::runtime::cancel::CancelMap;
use crate::runtime::lanes::LaneManager;
use crate::runtime::queue::MessageQueue;
use crate::runtime::steering::SteerMap;
use crate::state::AppState;

/// Startup failure, mapped to an exit code in `main`.
#[derive(Debug)]
pub enum StartupError {
    /// Exit code 64.
    ConfigInvalid(String),
    /// Exit code 69.
    DependencyUnavailable(String),
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigInvalid(m) => write!(f, "invalid configuration: {m}"),
            Self::DependencyUnavailable(m) => write!(f, "dependency unavailable: {m}"),
        }
    }
}

impl std::error::Error for StartupError {}

/// Build the full state from config plus the external collaborators.
/// Returns the state and the approval-prompt stream the serve loop must
/// forward to chats.
pub async fn build_state(
    config: Config,
    secrets: Arc<dyn SecretStore>,
    memory: Arc<dyn MemoryStore>,
    scheduler: Arc<dyn Scheduler>,
) -> std::result::Result<(AppState, tokio::sync::mpsc::Receiver<ApprovalRequest>), StartupError> {
    let registry = ProviderRegistry::from_config(&config.providers, secrets.as_ref())
        .await
        .map_err(|e| StartupError::DependencyUnavailable(format!("model endpoints: {e}")))?;
    build_state_with_registry(config, registry, memory, scheduler)
}

/// Same as [`build_state`] with a pre-built provider registry (embedders
/// and tests inject their own adapters here).
pub fn build_state_with_registry(
    config: Config,
    registry: ProviderRegistry,
    memory: Arc<dyn MemoryStore>,
    scheduler: Arc<dyn Scheduler>,
) -> std::result::Result<(AppState, tokio::sync::mpsc::Receiver<ApprovalRequest>), StartupError> {
    // ── Config validation ─────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        return Err(StartupError::ConfigInvalid(format!(
            "{errors} validation error(s)"
        )));
    }

    // ── Workspace root ────────────────────────────────────────────
    std::fs::create_dir_all(&config.tools.workspace_root).map_err(|e| {
        StartupError::DependencyUnavailable(format!(
            "workspace root {}: {e}",
            config.tools.workspace_root.display()
        ))
    })?;
    tracing::info!(path = %config.tools.workspace_root.display(), "workspace ready");

    // ── Session store ─────────────────────────────────────────────
    let sessions = Arc::new(SessionStore::new(&config.sessions.state_path).map_err(|e| {
        StartupError::DependencyUnavailable(format!("session store: {e}"))
    })?);

    // ── Model client ──────────────────────────────────────────────
    if registry.is_empty() {
        return Err(StartupError::DependencyUnavailable(
            "no model endpoints configured".into(),
        ));
    }
    let model = Arc::new(ModelClient::new(registry, &config.providers));
    tracing::info!(primary = %config.providers.primary, "model client ready");

    // ── Tools ─────────────────────────────────────────────────────
    let tool_registry = Arc::new(ToolRegistry::new());
    register_builtins(&tool_registry);
    let guard = Arc::new(Guard::new(config.tools.guard.clone()).map_err(|e| {
        StartupError::ConfigInvalid(format!("guard rules: {e}"))
    })?);
    let (approvals, approval_rx) =
        ApprovalBroker::new(Duration::from_secs(config.tools.approval_timeout_secs));
    let approvals = Arc::new(approvals);
    let audit = Arc::new(
        pl_tools::audit::AuditLog::new(&config.sessions.state_path).map_err(|e| {
            StartupError::DependencyUnavailable(format!("audit log: {e}"))
        })?,
    );
    let executor = Arc::new(ToolExecutor::new(
        tool_registry.clone(),
        guard.clone(),
        approvals.clone(),
        audit,
        &config.tools,
    ));
    tracing::info!(tools = tool_registry.len(), "tool executor ready");

    // ── Runtime plumbing ──────────────────────────────────────────
    let reloadable = Arc::new(RwLock::new(Arc::new(ReloadableConfig::from_config(&config))));
    let layer_cache = Arc::new(LayerCache::new(Duration::from_secs(
        config.composer.cache_ttl_secs,
    )));
    let lanes = LaneManager::new(config.lanes.clone());

    let state = AppState {
        config: Arc::new(config),
        reloadable,
        sessions,
        queue: Arc::new(MessageQueue::new()),
        branches: Arc::new(Mutex::new(HashMap::new())),
        access_notified: Arc::new(Mutex::new(std::collections::HashSet::new())),
        model,
        layer_cache,
        registry: tool_registry,
        guard,
        executor,
        approvals,
        lanes,
        cancel_map: Arc::new(CancelMap::new()),
        steering: Arc::new(SteerMap::new()),
        memory,
        scheduler,
        transports: Arc::new(RwLock::new(HashMap::new())),
    };

    tracing::info!("assistant state ready");
    Ok((state, approval_rx))
}

/// Apply a freshly loaded config: eligible sections swap in, ineligible
/// changes are rejected with a warning.
pub fn apply_reload(state: &AppState, incoming: Config) {
    let plan = pl_domain::config::plan_reload(&state.config, &incoming);
    if plan.is_noop() {
        tracing::info!("config reload: no changes");
        return;
    }
    for section in &plan.rejected {
        tracing::warn!(
            section = %section,
            "config change requires a restart; ignoring"
        );
    }
    if !plan.changed.is_empty() {
        if plan.changed.iter().any(|s| s == "tools.guard") {
            if let Err(e) = state.guard.reload(incoming.tools.guard.clone()) {
                tracing::warn!(error = %e, "guard reload failed; keeping old rules");
            }
        }
        *state.reloadable.write() = Arc::new(ReloadableConfig::from_config(&incoming));
    }
    pl_domain::trace::TraceEvent::ConfigReloaded {
        changed: plan.changed,
        rejected: plan.rejected,
    }
    .emit();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Default collaborators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// File-backed memory store used when no external index is wired in:
/// facts in a JSON map, searches by naive substring match. The epoch
/// counter still drives composer-cache invalidation.
pub struct FileMemoryStore {
    path: std::path::PathBuf,
    facts: RwLock<std::collections::BTreeMap<String, String>>,
    epoch: std::sync::atomic::AtomicU64,
}

impl FileMemoryStore {
    pub fn open(state_path: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(state_path)?;
        let path = state_path.join("memory.json");
        let facts = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?).unwrap_or_default()
        } else {
            Default::default()
        };
        Ok(Self {
            path,
            facts: RwLock::new(facts),
            epoch: std::sync::atomic::AtomicU64::new(1),
        })
    }

    fn flush(&self) -> Result<()> {
        let facts = self.facts.read();
        let json = serde_json::to_string_pretty(&*facts)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl MemoryStore for FileMemoryStore {
    async fn save_fact(&self, key: &str, value: &str) -> Result<()> {
        self.facts.write().insert(key.into(), value.into());
        self.epoch
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.flush()
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<MemoryHit>> {
        let needle = query.to_lowercase();
        let facts = self.facts.read();
        let hits: Vec<MemoryHit> = facts
            .iter()
            .filter(|(key, value)| {
                key.to_lowercase().contains(&needle) || value.to_lowercase().contains(&needle)
            })
            .map(|(key, value)| MemoryHit {
                key: key.clone(),
                content: value.clone(),
                score: 1.0,
            })
            .take(k)
            .collect();
        Ok(hits)
    }

    async fn daily_log(&self, date: chrono::NaiveDate, content: &str) -> Result<()> {
        let key = format!("daily.{date}");
        self.save_fact(&key, content).await
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// In-memory scheduler placeholder. Jobs register and list; persistence
/// and cron evaluation belong to the external scheduler integration.
#[derive(Default)]
pub struct InMemoryScheduler {
    jobs: Mutex<Vec<JobInfo>>,
}

#[async_trait::async_trait]
impl Scheduler for InMemoryScheduler {
    async fn register_job(&self, cron_expr: &str, spec: JobSpec) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.jobs.lock().push(JobInfo {
            id: id.clone(),
            cron_expr: cron_expr.into(),
            spec,
        });
        tracing::info!(job_id = %id, cron = %cron_expr, "job registered");
        Ok(id)
    }

    async fn list(&self) -> Result<Vec<JobInfo>> {
        Ok(self.jobs.lock().clone())
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        Ok(jobs.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_memory_roundtrip_and_epoch() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileMemoryStore::open(tmp.path()).unwrap();
        let e0 = store.epoch();

        store.save_fact("user.name", "Ada").await.unwrap();
        assert!(store.epoch() > e0);

        let hits = store.search("ada", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "user.name");

        // Reopen from disk.
        let reopened = FileMemoryStore::open(tmp.path()).unwrap();
        let hits = reopened.search("name", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn scheduler_register_list_remove() {
        let scheduler = InMemoryScheduler::default();
        let id = scheduler
            .register_job(
                "0 9 * * *",
                JobSpec {
                    channel_id: "console".into(),
                    chat_id: "local".into(),
                    prompt: "morning summary".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(scheduler.list().await.unwrap().len(), 1);
        assert!(scheduler.remove(&id).await.unwrap());
        assert!(!scheduler.remove(&id).await.unwrap());
    }
}
