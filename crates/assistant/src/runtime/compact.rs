//! Session compaction orchestration.
//!
//! The store handles the history surgery; this module supplies the model.
//! The summarize strategy runs a memory-flush pre-turn (the model may save
//! durable facts before the old range disappears), then asks for a
//! two-to-three sentence summary of the dropped range, keeps the newest
//! quarter of entries and prepends the summary as a synthetic system turn.
//!
//! Preventive compaction fires at 80% of the configured maximum so no
//! ongoing run hits the ceiling mid-flight.

use pl_domain::cancel::CancelToken;
use pl_domain::config::{CallerRole, CompactionStrategy};
use pl_domain::convo::Message;
use pl_domain::error::Result;
use pl_providers::ModelRequest;
use pl_sessions::{compact, SessionKey};
use pl_tools::context::ToolCtx;

use crate::state::AppState;

/// Compact if history crossed the preventive threshold. Returns whether a
/// compaction ran.
pub async fn preventive_compact_if_needed(state: &AppState, key: &SessionKey) -> bool {
    let threshold = state.config.sessions.preventive_threshold();
    let over = state
        .sessions
        .get(key)
        .map(|arc| arc.read().history.len() >= threshold)
        .unwrap_or(false);
    if !over {
        return false;
    }

    let strategy = state.config.sessions.compaction.strategy;
    match compact_session(state, key, strategy).await {
        Ok(ran) => ran,
        Err(e) => {
            tracing::warn!(session_key = %key, error = %e, "preventive compaction failed");
            false
        }
    }
}

/// Run one compaction with the given strategy. Returns false when there
/// was nothing to shrink.
pub async fn compact_session(
    state: &AppState,
    key: &SessionKey,
    strategy: CompactionStrategy,
) -> Result<bool> {
    match strategy {
        CompactionStrategy::Truncate | CompactionStrategy::Sliding => Ok(state
            .sessions
            .compact_local(
                key,
                strategy,
                state.config.sessions.preventive_threshold(),
                state.config.sessions.compaction.sliding_keep,
            )),
        CompactionStrategy::Summarize => summarize(state, key).await,
    }
}

async fn summarize(state: &AppState, key: &SessionKey) -> Result<bool> {
    let Some(session_arc) = state.sessions.get(key) else {
        return Ok(false);
    };
    let history = session_arc.read().history.clone();
    let len = history.len();
    if len < 4 {
        return Ok(false);
    }

    let keep = compact::summarize_keep(len, state.config.sessions.compaction.keep_ratio);
    if keep >= len {
        return Ok(false);
    }
    let (dropped, _kept) = compact::split_for_compaction(&history, keep);
    let conversation = compact::conversation_text(dropped);

    // ── Memory-flush pre-turn ─────────────────────────────────────
    // Best effort; an empty flush does not defer the compaction.
    run_memory_flush(state, key, &conversation).await;

    // ── Range summary ─────────────────────────────────────────────
    let cancel = CancelToken::new();
    let summary = match state
        .model
        .complete(
            ModelRequest {
                messages: vec![Message::user(compact::summary_prompt(&conversation))],
                max_output_tokens: Some(300),
                temperature: Some(0.1),
                ..Default::default()
            },
            None,
            None,
            &cancel,
        )
        .await
    {
        Ok(resp) if !resp.content.trim().is_empty() => resp.content.trim().to_string(),
        Ok(_) | Err(_) => {
            // No usable summary: shrink anyway so the retry can proceed,
            // just without the synthetic recap.
            tracing::warn!(session_key = %key, "summary generation failed; truncating instead");
            return Ok(state.sessions.compact_local(
                key,
                CompactionStrategy::Truncate,
                state.config.sessions.preventive_threshold(),
                state.config.sessions.compaction.sliding_keep,
            ));
        }
    };

    state
        .sessions
        .apply_compaction(key, CompactionStrategy::Summarize, &summary, len - keep, keep);
    Ok(true)
}

/// One constrained agent turn whose only tool is `memory_save`: a last
/// chance to persist durable facts from the range about to be dropped.
async fn run_memory_flush(state: &AppState, key: &SessionKey, conversation: &str) {
    let Some(entry) = state.registry.get("memory_save") else {
        return;
    };

    let cancel = CancelToken::new();
    let request = ModelRequest {
        messages: vec![
            Message::system(compact::memory_flush_prompt()),
            Message::user(format!("CONVERSATION ABOUT TO BE DROPPED:\n{conversation}")),
        ],
        tools: vec![entry.spec.clone()],
        max_output_tokens: Some(500),
        ..Default::default()
    };

    let response = match state.model.complete(request, None, None, &cancel).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(session_key = %key, error = %e, "memory-flush turn failed");
            return;
        }
    };

    if response.tool_calls.is_empty() {
        return;
    }

    let ctx = ToolCtx {
        session_key: key.to_string(),
        caller_id: "system:compaction".into(),
        caller_role: CallerRole::Admin,
        workspace_root: state.config.tools.workspace_root.clone(),
        cancel,
        memory: state.memory.clone(),
        scheduler: state.scheduler.clone(),
    };

    let saves = response
        .tool_calls
        .iter()
        .filter(|c| c.tool_name == "memory_save")
        .cloned()
        .collect::<Vec<_>>();
    let observations = state.executor.dispatch_batch(&saves, &ctx).await;
    let saved = observations.iter().filter(|o| !o.is_error()).count();
    tracing::info!(session_key = %key, saved, "memory flush complete");
}
