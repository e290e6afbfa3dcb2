//! The agent loop.
//!
//! One user turn drives: compose → model call → tool dispatch →
//! continuation, until the model answers without tool calls, the turn
//! budget (plus bounded auto-continuations) runs out, the loop detector
//! breaks the circuit, or cancellation lands. Context-overflow errors
//! trigger compaction and a bounded retry of the same turn.
//!
//! The runner never talks to a channel. Token fragments flow through the
//! caller's fragment sink (the block streamer sits on the other end) and
//! structured events through the event sink, which keeps the loop testable
//! against in-memory accumulators.

use std::time::Duration;

use tokio::sync::mpsc;

use pl_domain::cancel::CancelToken;
use pl_domain::config::CallerRole;
use pl_domain::convo::Message;
use pl_domain::error::{Error, ErrorClass};
use pl_domain::stream::{AgentEvent, Usage};
use pl_domain::trace::TraceEvent;
use pl_domain::turn::Turn;
use pl_providers::{FragmentSink, ModelRequest};
use pl_sessions::SessionKey;
use pl_tools::context::ToolCtx;
use pl_tools::loopdetect::{LoopDetector, LoopVerdict};

use super::{compact, prompt, prune};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RunRequest {
    pub key: SessionKey,
    /// Combined user text for this run (a drained batch arrives joined).
    pub user_text: String,
    pub caller_id: String,
    pub caller_role: CallerRole,
    /// Token fragments for progressive delivery; `None` = non-streaming.
    pub fragments: Option<FragmentSink>,
    /// Structured `tool_use` / `tool_result` / `done` / `error` events.
    pub events: Option<mpsc::Sender<AgentEvent>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEnd {
    Completed,
    Cancelled,
    Failed(String),
}

pub struct RunOutcome {
    pub end: RunEnd,
    pub final_text: String,
    /// Turns produced by this run, in commit order (assistant tool-call
    /// turns, observations, final assistant text). The orchestrator writes
    /// them to the session; a cancelled run commits nothing.
    pub turns: Vec<Turn>,
    pub usage: Usage,
    pub model_calls: u32,
    /// Steer messages that were still undelivered when the run ended. The
    /// orchestrator re-queues them as followups so nothing is lost.
    pub leftover_steers: Vec<String>,
}

impl RunOutcome {
    fn cancelled(turns: Vec<Turn>, usage: Usage, model_calls: u32) -> Self {
        Self {
            end: RunEnd::Cancelled,
            final_text: String::new(),
            turns,
            usage,
            model_calls,
            leftover_steers: Vec::new(),
        }
    }

    fn failed(message: impl Into<String>, turns: Vec<Turn>, usage: Usage, model_calls: u32) -> Self {
        Self {
            end: RunEnd::Failed(message.into()),
            final_text: String::new(),
            turns,
            usage,
            model_calls,
            leftover_steers: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one agent turn for a session. Registers the cancel token and steer
/// channel for the session, cleans both up on exit.
pub async fn run_agent(state: &AppState, req: RunRequest) -> RunOutcome {
    let key_str = req.key.to_string();
    let run_id = uuid::Uuid::new_v4().to_string();

    let cancel = state.cancel_map.register(&key_str);
    let mut steer_rx = state.steering.register(&key_str);

    TraceEvent::RunStarted {
        session_key: key_str.clone(),
        run_id: run_id.clone(),
        lane: format!("session:{key_str}"),
    }
    .emit();

    let mut outcome = run_inner(state, &req, &run_id, cancel, &mut steer_rx).await;

    // Steers that arrived after the last model call never reached the
    // model; hand them back instead of dropping them with the channel.
    state.steering.remove(&key_str);
    while let Ok(text) = steer_rx.try_recv() {
        outcome.leftover_steers.push(text);
    }

    state.cancel_map.remove(&key_str);

    match &outcome.end {
        RunEnd::Completed => TraceEvent::RunFinished {
            session_key: key_str,
            run_id,
            turns: outcome.model_calls,
            prompt_tokens: outcome.usage.prompt_tokens,
            completion_tokens: outcome.usage.completion_tokens,
        }
        .emit(),
        RunEnd::Cancelled => TraceEvent::RunCancelled {
            session_key: key_str,
            run_id,
            reason: "cancelled".into(),
        }
        .emit(),
        RunEnd::Failed(reason) => TraceEvent::RunCancelled {
            session_key: key_str,
            run_id,
            reason: reason.clone(),
        }
        .emit(),
    }

    outcome
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_inner(
    state: &AppState,
    req: &RunRequest,
    run_id: &str,
    cancel: CancelToken,
    steer_rx: &mut mpsc::Receiver<String>,
) -> RunOutcome {
    let runtime_cfg = &state.config.runtime;
    let key_str = req.key.to_string();

    let model_override = state
        .sessions
        .get(&req.key)
        .and_then(|arc| arc.read().overrides.model.clone());

    let tool_ctx = ToolCtx {
        session_key: key_str.clone(),
        caller_id: req.caller_id.clone(),
        caller_role: req.caller_role,
        workspace_root: state.config.tools.workspace_root.clone(),
        cancel: cancel.clone(),
        memory: state.memory.clone(),
        scheduler: state.scheduler.clone(),
    };

    // Live exchange for this run; prior history arrives through the
    // composed system prompt's conversation window.
    let mut live: Vec<Message> = vec![Message::user(&req.user_text)];
    let mut turns: Vec<Turn> = Vec::new();
    let mut total_usage = Usage::default();
    let mut model_calls: u32 = 0;

    let mut detector = LoopDetector::new(state.config.tools.loops.clone(), run_id);
    let mut pending_note: Option<String> = None;
    let mut compaction_attempts: u32 = 0;
    let mut continuations: u32 = 0;
    let mut budget = runtime_cfg.max_turns_per_request;
    let turn_timeout = Duration::from_secs(runtime_cfg.turn_timeout_secs);

    let mut turn_idx: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return RunOutcome::cancelled(Vec::new(), total_usage, model_calls);
        }

        // ── Steering: inject queued steer messages as user turns ──
        while let Ok(text) = steer_rx.try_recv() {
            tracing::debug!(session_key = %key_str, "steer message injected");
            turns.push(Turn::user(&text));
            live.push(Message::user(format!(
                "[mid-run message from the user] {text}"
            )));
        }

        // ── Reflection note ───────────────────────────────────────
        if turn_idx > 0 && runtime_cfg.reflection_interval > 0
            && turn_idx % runtime_cfg.reflection_interval == 0
        {
            live.push(Message::system(format!(
                "[progress] {turn_idx} of {budget} turns used — budget the remaining work"
            )));
        }
        if let Some(note) = pending_note.take() {
            live.push(Message::system(format!("[loop detector] {note}")));
        }

        // ── Compose ───────────────────────────────────────────────
        let composed =
            prompt::build_system_prompt(state, &req.key, &req.user_text, model_override.as_deref())
                .await;

        let mut messages = Vec::with_capacity(live.len() + 1);
        messages.push(Message::system(&composed.text));
        messages.extend(prune::prune_messages(&live, &runtime_cfg.prune));

        let request = ModelRequest {
            messages,
            tools: state.registry.specs(),
            cache: true,
            ..Default::default()
        };

        // ── Model call (bounded) ──────────────────────────────────
        let call = state.model.complete(
            request,
            model_override.as_deref(),
            req.fragments.as_ref(),
            &cancel,
        );
        let response = match tokio::time::timeout(turn_timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.class() == ErrorClass::Context => {
                if compaction_attempts >= runtime_cfg.max_compaction_attempts {
                    return RunOutcome::failed(
                        "the conversation no longer fits the model even after compaction",
                        turns,
                        total_usage,
                        model_calls,
                    );
                }
                compaction_attempts += 1;
                tracing::info!(
                    session_key = %key_str,
                    attempt = compaction_attempts,
                    "context overflow; compacting and retrying"
                );
                if let Err(ce) =
                    compact::compact_session(state, &req.key, state.config.sessions.compaction.strategy)
                        .await
                {
                    tracing::warn!(error = %ce, "compaction during overflow failed");
                }
                live = prune::clamp_tool_results(&live, 2_000);
                continue; // same turn, recomposed
            }
            Ok(Err(e)) => {
                return RunOutcome::failed(
                    user_facing_model_error(&e),
                    turns,
                    total_usage,
                    model_calls,
                );
            }
            Err(_) => {
                return RunOutcome::failed(
                    format!("the model did not answer within {}s", turn_timeout.as_secs()),
                    turns,
                    total_usage,
                    model_calls,
                );
            }
        };

        model_calls += 1;
        if let Some(usage) = &response.usage {
            total_usage.accumulate(usage);
        }

        if cancel.is_cancelled() || response.finish_reason.as_deref() == Some("cancelled") {
            return RunOutcome::cancelled(Vec::new(), total_usage, model_calls);
        }

        // ── Final answer ──────────────────────────────────────────
        if response.tool_calls.is_empty() {
            let final_text = response.content;
            turns.push(Turn::assistant(&final_text));
            emit(&req.events, AgentEvent::Done {
                text: final_text.clone(),
                usage: total_usage,
            })
            .await;
            return RunOutcome {
                end: RunEnd::Completed,
                final_text,
                turns,
                usage: total_usage,
                model_calls,
                leftover_steers: Vec::new(),
            };
        }

        // ── Tool phase ────────────────────────────────────────────
        turns.push(Turn::assistant_with_calls(
            &response.content,
            response.tool_calls.clone(),
        ));
        live.push(Message::assistant_with_calls(
            &response.content,
            &response.tool_calls,
        ));

        for call in &response.tool_calls {
            emit(&req.events, AgentEvent::ToolUse {
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                arguments: call.arguments.clone(),
            })
            .await;

            match detector.observe(call) {
                LoopVerdict::Clear => {}
                LoopVerdict::Warning { message } | LoopVerdict::Critical { message } => {
                    pending_note = Some(message);
                }
                LoopVerdict::Break { message } => {
                    emit(&req.events, AgentEvent::Error {
                        message: message.clone(),
                    })
                    .await;
                    return RunOutcome::failed(message, turns, total_usage, model_calls);
                }
            }
        }

        // An interrupt that landed between the model call and dispatch is
        // honored before any handler runs.
        if cancel.is_cancelled() {
            return RunOutcome::cancelled(Vec::new(), total_usage, model_calls);
        }

        let observations = state
            .executor
            .dispatch_batch(&response.tool_calls, &tool_ctx)
            .await;

        for obs in observations {
            emit(&req.events, AgentEvent::ToolResult {
                call_id: obs.call_id.clone(),
                tool_name: obs.tool_name.clone(),
                content: obs.content.clone(),
                is_error: obs.is_error(),
            })
            .await;
            live.push(Message::tool_result(
                &obs.call_id,
                &obs.content,
                obs.is_error(),
            ));
            turns.push(Turn::tool(obs));
        }

        // ── Budget / auto-continuation ────────────────────────────
        turn_idx += 1;
        if turn_idx >= budget {
            if continuations < runtime_cfg.max_continuations {
                continuations += 1;
                budget += runtime_cfg.max_turns_per_request;
                tracing::info!(
                    session_key = %key_str,
                    continuation = continuations,
                    "turn budget exhausted mid-tooling; auto-continuing"
                );
                live.push(Message::system(
                    "[progress] turn budget extended once — wrap up promptly",
                ));
            } else {
                let message = format!(
                    "stopped after {turn_idx} turns and {continuations} continuations \
                     without a final answer"
                );
                emit(&req.events, AgentEvent::Error {
                    message: message.clone(),
                })
                .await;
                return RunOutcome::failed(message, turns, total_usage, model_calls);
            }
        }
    }
}

async fn emit(events: &Option<mpsc::Sender<AgentEvent>>, event: AgentEvent) {
    if let Some(tx) = events {
        if tx.send(event).await.is_err() {
            tracing::debug!("event sink closed");
        }
    }
}

/// Short, non-technical message for failures that surface to the chat.
fn user_facing_model_error(e: &Error) -> String {
    match e.class() {
        ErrorClass::Auth => "I can't reach my language model right now (credentials \
                             problem). Please tell the operator."
            .into(),
        ErrorClass::BadRequest => "something went wrong building my request; the \
                                   operator has been notified"
            .into(),
        _ => "I'm having trouble reaching my language model — please try again in a \
              moment"
            .into(),
    }
}
