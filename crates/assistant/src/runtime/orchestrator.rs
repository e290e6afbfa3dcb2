//! The assistant orchestrator: one inbound message → one completed turn.
//!
//! Ingress pipeline: validation → access check → command dispatch →
//! queue-mode policy → session resolution → enrichment → agent run →
//! progressive block delivery → commit → preventive compaction.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use pl_domain::channel::{ChannelTransport, InboundMessage, OutboundPayload};
use pl_domain::config::{AccessPolicy, CallerRole, QueueMode};
use pl_domain::schedule::JobSpec;
use pl_domain::stream::StreamEvent;
use pl_domain::turn::Turn;
use pl_sessions::SessionKey;

use super::runner::{run_agent, RunEnd, RunRequest};
use super::streamer::BlockStreamer;
use super::{commands, compact, enrich};
use crate::runtime::queue::EnqueueOutcome;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ingress
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Entry point for every inbound message.
pub async fn handle_inbound(state: &AppState, msg: InboundMessage) {
    let reloadable = state.reloadable();

    // ── Validation ────────────────────────────────────────────────
    if msg.content.trim().is_empty() && msg.attachments.is_empty() {
        reply_direct(state, &msg, "I received an empty message — say something and I'll help.")
            .await;
        return;
    }
    if msg.content.len() > reloadable.access.max_message_chars {
        reply_direct(
            state,
            &msg,
            &format!(
                "that message is too long for me ({} characters; the limit is {}).",
                msg.content.len(),
                reloadable.access.max_message_chars
            ),
        )
        .await;
        return;
    }

    // ── Access ────────────────────────────────────────────────────
    let role = reloadable.access.role_of(&msg.channel_id, &msg.from_id);
    if !reloadable.access.permits(role) {
        match reloadable.access.policy {
            AccessPolicy::Ask => {
                let sender = format!("{}:{}", msg.channel_id, msg.from_id);
                let first_time = state.access_notified.lock().insert(sender);
                if first_time {
                    reply_direct(state, &msg, "your access request is pending approval.").await;
                }
            }
            _ => {
                tracing::debug!(
                    channel = %msg.channel_id,
                    from = %msg.from_id,
                    "dropping message from unlisted sender"
                );
            }
        }
        return;
    }

    // ── Session resolution ────────────────────────────────────────
    let branch = state.branch_for(&msg.channel_id, &msg.chat_id);
    let key = SessionKey::new(msg.channel_id.clone(), msg.chat_id.clone(), branch);
    let key_str = key.to_string();

    // ── Command dispatch ──────────────────────────────────────────
    if let Some(parsed) = commands::parse(&msg.content) {
        let reply = match parsed {
            Ok(command) => {
                if role < command.required_role() {
                    "that command needs admin access.".to_string()
                } else {
                    commands::execute(state, &key, command).await
                }
            }
            Err(usage) => usage,
        };
        reply_direct(state, &msg, &reply).await;
        return;
    }

    // ── Queue-mode policy ─────────────────────────────────────────
    let mode = state
        .sessions
        .get(&key)
        .and_then(|arc| arc.read().overrides.queue_mode)
        .unwrap_or_else(|| reloadable.queue.mode_for(&msg.channel_id));

    if state.queue.is_processing(&key_str) {
        match mode {
            QueueMode::Steer | QueueMode::SteerBacklog => {
                let text = enrich::enrich_content(&msg);
                if state.steering.try_steer(&key_str, &text) {
                    return;
                }
                // The run ended (or its channel filled) between the busy
                // check and the steer: the backlog drain picks it up.
                enqueue_and_maybe_claim(state, &key, msg, role).await;
            }
            QueueMode::Interrupt => {
                state.cancel_map.cancel(&key_str);
                enqueue_and_maybe_claim(state, &key, msg, role).await;
            }
            QueueMode::Collect | QueueMode::Followup => {
                enqueue_and_maybe_claim(state, &key, msg, role).await;
            }
        }
        return;
    }

    enqueue_and_maybe_claim(state, &key, msg, role).await;
}

/// Enqueue (dedup applies) and, if nobody owns the session, claim it and
/// schedule the processing loop on the session's lane.
async fn enqueue_and_maybe_claim(
    state: &AppState,
    key: &SessionKey,
    msg: InboundMessage,
    role: CallerRole,
) {
    let key_str = key.to_string();
    let reloadable = state.reloadable();

    if state.queue.enqueue(&key_str, msg, &reloadable.queue) == EnqueueOutcome::Duplicate {
        return;
    }

    if state.queue.try_set_processing(&key_str) {
        schedule_processing(state, key.clone(), role);
    }
}

fn schedule_processing(state: &AppState, key: SessionKey, role: CallerRole) {
    let state = state.clone();
    let lane = format!("session:{key}");
    let lanes = state.lanes.clone();
    lanes.enqueue(&lane, 0, async move {
        process_session(&state, &key, role).await;
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session processing loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drain-and-run until the queue stays empty, then release the busy flag.
/// A batch that arrived during a run is debounced briefly so stragglers of
/// a burst join it.
async fn process_session(state: &AppState, key: &SessionKey, role: CallerRole) {
    let key_str = key.to_string();
    let mut first_pass = true;

    loop {
        if !first_pass && state.queue.pending_len(&key_str) > 0 {
            let debounce = Duration::from_millis(state.reloadable().queue.debounce_ms);
            tokio::time::sleep(debounce).await;
        }
        first_pass = false;

        let batch = state.queue.drain(&key_str);
        if batch.is_empty() {
            break;
        }
        run_batch(state, key, batch, role).await;
    }

    state.queue.clear_processing(&key_str);

    // A message may have slipped in between the final drain and the flag
    // clear; whoever enqueued it saw `processing = true` and left it to us.
    if state.queue.pending_len(&key_str) > 0 && state.queue.try_set_processing(&key_str) {
        schedule_processing(state, key.clone(), role);
    }
}

async fn run_batch(
    state: &AppState,
    key: &SessionKey,
    batch: Vec<InboundMessage>,
    role: CallerRole,
) {
    let key_str = key.to_string();
    let transport = state.transport(&key.channel);
    let first = &batch[0];
    let caller_id = first.from_id.clone();
    let reply_to = Some(first.msg_id.clone());
    let msg_ids: Vec<String> = batch.iter().map(|m| m.msg_id.clone()).collect();

    // ── Enrich + commit user turns ────────────────────────────────
    let texts: Vec<String> = batch.iter().map(enrich::enrich_content).collect();
    for text in &texts {
        state.sessions.commit_turn(key, Turn::user(text));
    }
    let combined = enrich::combine_batch(&texts);

    // Typing indicator + read receipts, best effort.
    if let Some(t) = &transport {
        if let Err(e) = t.typing(&key.chat_id).await {
            tracing::debug!(error = %e, "typing indicator failed");
        }
        if let Err(e) = t.mark_read(&msg_ids).await {
            tracing::debug!(error = %e, "mark_read failed");
        }
    }

    // ── Streaming plumbing ────────────────────────────────────────
    let (fragments, streamer_handle) = match &transport {
        Some(t) if state.config.runtime.streaming.enabled => {
            let (tx, rx) = mpsc::channel::<StreamEvent>(64);
            let handle = spawn_streamer(
                t.clone(),
                key.chat_id.clone(),
                reply_to.clone(),
                Duration::from_millis(state.config.runtime.streaming.idle_ms),
                rx,
            );
            (Some(tx), Some(handle))
        }
        _ => (None, None),
    };

    // ── Run ───────────────────────────────────────────────────────
    let outcome = run_agent(
        state,
        RunRequest {
            key: key.clone(),
            user_text: combined,
            caller_id,
            caller_role: role,
            fragments,
            events: None,
        },
    )
    .await;

    // The fragment sender is dropped with the request; the streamer sees
    // the channel close, flushes its tail and reports what it sent.
    let streamed_blocks = match streamer_handle {
        Some(handle) => handle.await.unwrap_or(0),
        None => 0,
    };

    // ── Undelivered steers become followups ───────────────────────
    if !outcome.leftover_steers.is_empty() {
        let reloadable = state.reloadable();
        for text in &outcome.leftover_steers {
            let followup = InboundMessage {
                channel_id: key.channel.clone(),
                chat_id: key.chat_id.clone(),
                from_id: first.from_id.clone(),
                // Sender attribution is already embedded by the steer-path
                // enrichment; not a group message anymore.
                is_group: false,
                content: text.clone(),
                attachments: vec![],
                reply_to: None,
                msg_id: uuid::Uuid::new_v4().to_string(),
                received_at: chrono::Utc::now(),
            };
            state.queue.enqueue(&key_str, followup, &reloadable.queue);
        }
    }

    // ── Commit + deliver ──────────────────────────────────────────
    match outcome.end {
        RunEnd::Completed => {
            for turn in &outcome.turns {
                state.sessions.commit_turn(key, turn.clone());
            }
            state.sessions.record_usage(key, &outcome.usage);

            if streamed_blocks == 0 {
                // Streaming never produced a block (disabled, or the whole
                // answer fit the buffer): single non-streaming send.
                send_text(&transport, &key.chat_id, &outcome.final_text, reply_to).await;
            }

            compact::preventive_compact_if_needed(state, key).await;
        }
        RunEnd::Cancelled => {
            // Nothing committed beyond the user turns; an interrupting
            // message is already queued and takes over from here.
            tracing::info!(session_key = %key_str, "run cancelled before commit");
        }
        RunEnd::Failed(reason) => {
            for turn in &outcome.turns {
                state.sessions.commit_turn(key, turn.clone());
            }
            state.sessions.record_usage(key, &outcome.usage);
            send_text(
                &transport,
                &key.chat_id,
                &format!("sorry — {reason}."),
                reply_to,
            )
            .await;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduled jobs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run a scheduler-fired job as an agent turn on the `cron` lane.
pub fn spawn_job_turn(state: &AppState, job: JobSpec) {
    let state = state.clone();
    let lanes = state.lanes.clone();
    lanes.enqueue("cron", 0, async move {
        let key = SessionKey::main(&job.channel_id, &job.chat_id);
        let key_str = key.to_string();

        // Jobs respect the same one-run-per-session rule as messages.
        if !state.queue.try_set_processing(&key_str) {
            tracing::info!(session_key = %key_str, "job skipped: session busy");
            return;
        }

        let synthetic = InboundMessage {
            channel_id: job.channel_id.clone(),
            chat_id: job.chat_id.clone(),
            from_id: "scheduler".into(),
            is_group: false,
            content: format!("[scheduled task] {}", job.prompt),
            attachments: vec![],
            reply_to: None,
            msg_id: uuid::Uuid::new_v4().to_string(),
            received_at: chrono::Utc::now(),
        };
        run_batch(&state, &key, vec![synthetic], CallerRole::Admin).await;
        state.queue.clear_processing(&key_str);
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Delivery helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Consume the fragment stream into a block streamer. Flushes on idle
/// windows and at iteration boundaries (`Done` events); finishes — tail
/// flush included — when the channel closes. Returns blocks sent.
fn spawn_streamer(
    transport: Arc<dyn ChannelTransport>,
    chat_id: String,
    reply_to: Option<String>,
    idle: Duration,
    mut rx: mpsc::Receiver<StreamEvent>,
) -> tokio::task::JoinHandle<usize> {
    tokio::spawn(async move {
        let mut streamer = BlockStreamer::new(transport, chat_id, reply_to);
        loop {
            match tokio::time::timeout(idle, rx.recv()).await {
                Ok(Some(StreamEvent::Token { text })) => streamer.push(&text).await,
                Ok(Some(StreamEvent::Done { .. })) => streamer.flush_now().await,
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => streamer.flush_now().await,
            }
        }
        streamer.finish().await;
        streamer.blocks_sent()
    })
}

async fn send_text(
    transport: &Option<Arc<dyn ChannelTransport>>,
    chat_id: &str,
    text: &str,
    reply_to: Option<String>,
) {
    if text.trim().is_empty() {
        return;
    }
    let Some(transport) = transport else {
        tracing::warn!(chat = %chat_id, "no transport attached; dropping outbound text");
        return;
    };
    if let Err(kind) = transport
        .send(
            chat_id,
            OutboundPayload {
                text: transport.format_block(text),
                reply_to,
            },
        )
        .await
    {
        tracing::warn!(chat = %chat_id, ?kind, "outbound send failed");
    }
}

async fn reply_direct(state: &AppState, msg: &InboundMessage, text: &str) {
    let transport = state.transport(&msg.channel_id);
    send_text(&transport, &msg.chat_id, text, Some(msg.msg_id.clone())).await;
}
