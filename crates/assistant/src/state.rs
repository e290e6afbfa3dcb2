use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use pl_composer::cache::LayerCache;
use pl_domain::channel::ChannelTransport;
use pl_domain::config::{Config, ReloadableConfig};
use pl_domain::memory::MemoryStore;
use pl_domain::schedule::Scheduler;
use pl_providers::ModelClient;
use pl_sessions::SessionStore;
use pl_tools::{ApprovalBroker, Guard, ToolExecutor, ToolRegistry};

use crate::runtime::cancel::CancelMap;
use crate::runtime::lanes::LaneManager;
use crate::runtime::queue::MessageQueue;
use crate::runtime::steering::SteerMap;

/// Shared application state handed to the runtime.
///
/// Fields are grouped by concern:
/// - **Config** — startup snapshot plus the hot-reloadable slice
/// - **Sessions** — store, queue, per-chat branch tracking
/// - **Model & prompt** — failover client, layer cache
/// - **Tools** — registry, guard, executor, approvals
/// - **Concurrency** — lanes, cancel map, steer map
/// - **Collaborators** — memory, scheduler, channel transports
#[derive(Clone)]
pub struct AppState {
    // ── Config ────────────────────────────────────────────────────
    pub config: Arc<Config>,
    /// Reload-eligible slice; handlers deref per use, reload swaps it.
    pub reloadable: Arc<RwLock<Arc<ReloadableConfig>>>,

    // ── Sessions ──────────────────────────────────────────────────
    pub sessions: Arc<SessionStore>,
    pub queue: Arc<MessageQueue>,
    /// Current branch per `(channel, chat)`; `/new` rotates it.
    pub branches: Arc<Mutex<HashMap<(String, String), String>>>,
    /// Guest senders already told their access is pending (policy = ask).
    pub access_notified: Arc<Mutex<std::collections::HashSet<String>>>,

    // ── Model & prompt ────────────────────────────────────────────
    pub model: Arc<ModelClient>,
    pub layer_cache: Arc<LayerCache>,

    // ── Tools ─────────────────────────────────────────────────────
    pub registry: Arc<ToolRegistry>,
    pub guard: Arc<Guard>,
    pub executor: Arc<ToolExecutor>,
    pub approvals: Arc<ApprovalBroker>,

    // ── Concurrency ───────────────────────────────────────────────
    pub lanes: Arc<LaneManager>,
    pub cancel_map: Arc<CancelMap>,
    pub steering: Arc<SteerMap>,

    // ── Collaborators ─────────────────────────────────────────────
    pub memory: Arc<dyn MemoryStore>,
    pub scheduler: Arc<dyn Scheduler>,
    pub transports: Arc<RwLock<HashMap<String, Arc<dyn ChannelTransport>>>>,
}

impl AppState {
    pub fn reloadable(&self) -> Arc<ReloadableConfig> {
        self.reloadable.read().clone()
    }

    pub fn transport(&self, channel_id: &str) -> Option<Arc<dyn ChannelTransport>> {
        self.transports.read().get(channel_id).cloned()
    }

    pub fn attach_transport(&self, transport: Arc<dyn ChannelTransport>) {
        let id = transport.id().to_string();
        tracing::info!(channel = %id, "transport attached");
        self.transports.write().insert(id, transport);
    }

    /// Current branch for a chat (default `main`).
    pub fn branch_for(&self, channel_id: &str, chat_id: &str) -> String {
        self.branches
            .lock()
            .get(&(channel_id.to_string(), chat_id.to_string()))
            .cloned()
            .unwrap_or_else(|| "main".to_string())
    }

    pub fn set_branch(&self, channel_id: &str, chat_id: &str, branch: String) {
        self.branches
            .lock()
            .insert((channel_id.to_string(), chat_id.to_string()), branch);
    }
}
