//! Tool dispatch engine.
//!
//! Per agent turn the model may emit N calls. Stateful handlers run
//! strictly sequentially in call order; everything else runs concurrently
//! under a semaphore. Results are re-assembled into call order before they
//! are handed back, so history commits deterministically no matter which
//! call finished first.
//!
//! A denied call produces a synthetic `blocked: <reason>` observation —
//! the model must see the denial, not an exception.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;

use pl_domain::config::ToolsConfig;
use pl_domain::convo::ToolCall;
use pl_domain::error::Error;
use pl_domain::trace::TraceEvent;
use pl_domain::turn::{ToolObservation, ToolOutcome};

use crate::approval::{ApprovalBroker, ApprovalDecision, ApprovalRequest};
use crate::audit::{redact_args, AuditEntry, AuditLog};
use crate::context::ToolCtx;
use crate::guard::Guard;
use crate::registry::ToolRegistry;
use crate::schema;

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    guard: Arc<Guard>,
    approvals: Arc<ApprovalBroker>,
    audit: Arc<AuditLog>,
    max_parallel: usize,
    call_timeout: Duration,
    max_result_chars: usize,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        guard: Arc<Guard>,
        approvals: Arc<ApprovalBroker>,
        audit: Arc<AuditLog>,
        config: &ToolsConfig,
    ) -> Self {
        Self {
            registry,
            guard,
            approvals,
            audit,
            max_parallel: config.max_parallel,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            max_result_chars: config.max_result_chars,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Dispatch one turn's calls. The returned observations are in the
    /// model's call order.
    pub async fn dispatch_batch(
        &self,
        calls: &[ToolCall],
        ctx: &ToolCtx,
    ) -> Vec<ToolObservation> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));

        let mut sequential: Vec<(usize, &ToolCall)> = Vec::new();
        let mut concurrent: Vec<(usize, &ToolCall)> = Vec::new();
        for (idx, call) in calls.iter().enumerate() {
            let stateful = self
                .registry
                .get(&call.tool_name)
                .map(|e| e.stateful)
                .unwrap_or(false);
            if stateful {
                sequential.push((idx, call));
            } else {
                concurrent.push((idx, call));
            }
        }

        let parallel_futs = concurrent.into_iter().map(|(idx, call)| {
            let semaphore = semaphore.clone();
            async move {
                // Holding the permit for the whole call bounds concurrency;
                // a closed semaphore cannot happen (we own it).
                let _permit = semaphore.acquire().await;
                (idx, self.execute_one(call, ctx, true).await)
            }
        });

        let sequential_fut = async {
            let mut out = Vec::with_capacity(sequential.len());
            for (idx, call) in sequential {
                out.push((idx, self.execute_one(call, ctx, false).await));
            }
            out
        };

        let (mut parallel_done, sequential_done) = futures_util::future::join(
            futures_util::future::join_all(parallel_futs),
            sequential_fut,
        )
        .await;
        parallel_done.extend(sequential_done);

        let mut results: Vec<Option<ToolObservation>> = vec![None; calls.len()];
        for (idx, obs) in parallel_done {
            results[idx] = Some(obs);
        }
        results.into_iter().flatten().collect()
    }

    // ── One call ───────────────────────────────────────────────────

    async fn execute_one(
        &self,
        call: &ToolCall,
        ctx: &ToolCtx,
        parallel: bool,
    ) -> ToolObservation {
        let started = Instant::now();

        if ctx.cancel.is_cancelled() {
            return self.finish(call, ctx, started, parallel, ToolOutcome::Denied, "blocked: run cancelled".into());
        }

        // Unknown tool: the model hallucinated a name.
        let Some(entry) = self.registry.get(&call.tool_name) else {
            let known: Vec<String> = self
                .registry
                .specs()
                .into_iter()
                .map(|s| s.name)
                .collect();
            return self.finish(
                call,
                ctx,
                started,
                parallel,
                ToolOutcome::Failed,
                format!(
                    "error: unknown tool '{}'. Available: {}",
                    call.tool_name,
                    known.join(", ")
                ),
            );
        };

        // Guard.
        if let Err(e) = self.guard.check(call, ctx) {
            let reason = match e {
                Error::ToolDenied(reason) => reason,
                other => other.to_string(),
            };
            TraceEvent::ToolBlocked {
                tool_name: call.tool_name.clone(),
                call_id: call.call_id.clone(),
                reason: reason.clone(),
            }
            .emit();
            return self.finish(
                call,
                ctx,
                started,
                parallel,
                ToolOutcome::Denied,
                format!("blocked: {reason}"),
            );
        }

        // Schema validation.
        if let Err(problem) = schema::validate_args(&entry.spec.parameters, &call.arguments) {
            return self.finish(
                call,
                ctx,
                started,
                parallel,
                ToolOutcome::Failed,
                format!("error: invalid arguments: {problem}"),
            );
        }

        // Approval round-trip.
        if entry.requires_confirmation {
            let decision = self
                .approvals
                .request(ApprovalRequest {
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    summary: summarize_call(call),
                    session_key: ctx.session_key.clone(),
                    created_at: Utc::now(),
                })
                .await;
            if let ApprovalDecision::Denied { reason } = decision {
                return self.finish(
                    call,
                    ctx,
                    started,
                    parallel,
                    ToolOutcome::Denied,
                    format!("blocked: {reason}"),
                );
            }
        }

        // Run, bounded.
        let result =
            tokio::time::timeout(self.call_timeout, entry.handler.handle(&call.arguments, ctx))
                .await;

        let (outcome, content) = match result {
            Ok(Ok(output)) => (ToolOutcome::Ok, self.truncate(output)),
            Ok(Err(e)) => (ToolOutcome::Failed, format!("error: {e}")),
            Err(_) => (
                ToolOutcome::TimedOut,
                format!(
                    "error: tool timed out after {}s",
                    self.call_timeout.as_secs()
                ),
            ),
        };

        self.finish(call, ctx, started, parallel, outcome, content)
    }

    fn finish(
        &self,
        call: &ToolCall,
        ctx: &ToolCtx,
        started: Instant,
        parallel: bool,
        outcome: ToolOutcome,
        content: String,
    ) -> ToolObservation {
        let elapsed_ms = started.elapsed().as_millis() as u64;

        self.audit.append(&AuditEntry {
            at: Utc::now(),
            session_key: ctx.session_key.clone(),
            caller_id: ctx.caller_id.clone(),
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            arguments: redact_args(&call.arguments),
            outcome,
            detail: if outcome == ToolOutcome::Ok {
                String::new()
            } else {
                content.chars().take(200).collect()
            },
            elapsed_ms,
        });

        TraceEvent::ToolDispatched {
            tool_name: call.tool_name.clone(),
            call_id: call.call_id.clone(),
            parallel,
            duration_ms: elapsed_ms,
            outcome: format!("{outcome:?}").to_lowercase(),
        }
        .emit();

        ToolObservation {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            args_fingerprint: call.args_fingerprint(),
            content,
            elapsed_ms,
            outcome,
        }
    }

    fn truncate(&self, text: String) -> String {
        if text.len() <= self.max_result_chars {
            return text;
        }
        let mut cut = self.max_result_chars;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        let dropped = text.len() - cut;
        format!("{}\n[truncated {dropped} bytes]", &text[..cut])
    }
}

fn summarize_call(call: &ToolCall) -> String {
    let args = redact_args(&call.arguments).to_string();
    let clipped: String = args.chars().take(160).collect();
    format!("{}({clipped})", call.tool_name)
}
