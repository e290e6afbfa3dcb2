//! Built-in tool set.
//!
//! Filesystem access (containment-enforced), a stateful shell, long-term
//! memory, and job scheduling. Channel- or deployment-specific tools are
//! registered by the embedder on top of these.

mod exec;
mod fs;
mod memory;
mod schedule;

pub use exec::ExecTool;
pub use fs::{ListDirTool, ReadFileTool, WriteFileTool};
pub use memory::{MemorySaveTool, MemorySearchTool};
pub use schedule::ScheduleJobTool;

use std::sync::Arc;

use crate::registry::{ToolEntry, ToolRegistry};

/// Register the standard tool set.
///
/// `exec` is stateful (persistent cwd/env) and confirmation-gated;
/// `write_file` is stateful so workspace mutations serialize. The
/// read-only tools run in parallel.
pub fn register_builtins(registry: &ToolRegistry) {
    registry.register(ToolEntry {
        spec: fs::read_file_spec(),
        handler: Arc::new(ReadFileTool),
        stateful: false,
        requires_confirmation: false,
    });
    registry.register(ToolEntry {
        spec: fs::write_file_spec(),
        handler: Arc::new(WriteFileTool),
        stateful: true,
        requires_confirmation: false,
    });
    registry.register(ToolEntry {
        spec: fs::list_dir_spec(),
        handler: Arc::new(ListDirTool),
        stateful: false,
        requires_confirmation: false,
    });
    registry.register(ToolEntry {
        spec: exec::exec_spec(),
        handler: Arc::new(ExecTool::new()),
        stateful: true,
        requires_confirmation: true,
    });
    registry.register(ToolEntry {
        spec: memory::memory_save_spec(),
        handler: Arc::new(MemorySaveTool),
        stateful: false,
        requires_confirmation: false,
    });
    registry.register(ToolEntry {
        spec: memory::memory_search_spec(),
        handler: Arc::new(MemorySearchTool),
        stateful: false,
        requires_confirmation: false,
    });
    registry.register(ToolEntry {
        spec: schedule::schedule_job_spec(),
        handler: Arc::new(ScheduleJobTool),
        stateful: false,
        requires_confirmation: false,
    });

    tracing::info!(tools = registry.len(), "built-in tools registered");
}
