//! Tool registry.
//!
//! A copy-on-write map: readers grab an `Arc` snapshot and never block
//! writers; registration clones the map, inserts, and swaps the pointer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use pl_domain::convo::ToolSpec;
use pl_domain::error::Result;

use crate::context::ToolCtx;

/// A tool implementation.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool. Errors become `ToolFailed` observations; they never
    /// abort the agent turn.
    async fn handle(&self, args: &Value, ctx: &ToolCtx) -> Result<String>;
}

/// One registered tool.
#[derive(Clone)]
pub struct ToolEntry {
    pub spec: ToolSpec,
    pub handler: Arc<dyn ToolHandler>,
    /// Stateful tools run strictly sequentially in call order.
    pub stateful: bool,
    /// Calls gate on a human `/approve` before running.
    pub requires_confirmation: bool,
}

type ToolMap = HashMap<String, ToolEntry>;

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<Arc<ToolMap>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entry: ToolEntry) {
        let mut guard = self.tools.write();
        let mut next = (**guard).clone();
        let name = entry.spec.name.clone();
        if next.insert(name.clone(), entry).is_some() {
            tracing::warn!(tool = %name, "tool re-registered; replacing handler");
        }
        *guard = Arc::new(next);
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut guard = self.tools.write();
        let mut next = (**guard).clone();
        let removed = next.remove(name).is_some();
        if removed {
            *guard = Arc::new(next);
        }
        removed
    }

    /// Read snapshot. Holds no lock after return.
    pub fn snapshot(&self) -> Arc<ToolMap> {
        self.tools.read().clone()
    }

    pub fn get(&self, name: &str) -> Option<ToolEntry> {
        self.snapshot().get(name).cloned()
    }

    /// Tool schemas for the model, sorted by name for stable prompts.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let snapshot = self.snapshot();
        let mut specs: Vec<ToolSpec> = snapshot.values().map(|e| e.spec.clone()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}
