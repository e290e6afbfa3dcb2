use serde::Serialize;

/// Structured trace events emitted across all Parley crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionResolved {
        session_key: String,
        is_new: bool,
    },
    SessionEvicted {
        session_key: String,
        idle_secs: u64,
    },
    QueueDropped {
        session_key: String,
        reason: String,
    },
    RunStarted {
        session_key: String,
        run_id: String,
        lane: String,
    },
    RunFinished {
        session_key: String,
        run_id: String,
        turns: u32,
        prompt_tokens: u32,
        completion_tokens: u32,
    },
    RunCancelled {
        session_key: String,
        run_id: String,
        reason: String,
    },
    PromptComposed {
        session_key: String,
        layers_included: usize,
        layers_trimmed: usize,
        layers_dropped: usize,
        estimated_tokens: usize,
    },
    ToolDispatched {
        tool_name: String,
        call_id: String,
        parallel: bool,
        duration_ms: u64,
        outcome: String,
    },
    ToolBlocked {
        tool_name: String,
        call_id: String,
        reason: String,
    },
    LoopDetected {
        run_id: String,
        pattern: String,
        count: u32,
        severity: String,
    },
    ModelRequest {
        model: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    ModelFallback {
        from_model: String,
        to_model: String,
        reason: String,
    },
    CompactionRun {
        session_key: String,
        strategy: String,
        turns_before: usize,
        turns_after: usize,
    },
    RecordAppend {
        session_key: String,
        records: usize,
    },
    ConfigReloaded {
        changed: Vec<String>,
        rejected: Vec<String>,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "pl_event");
    }
}
