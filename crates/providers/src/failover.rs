//! Class-gated failover across the configured model chain.
//!
//! One [`ModelClient`] serves every concurrent request. Failure cooldowns
//! live in a single small mutex-protected table: readers consult it while
//! building the candidate list, writers update it when a model exhausts its
//! retry budget. Auth and bad-request errors never trigger failover; a
//! context overflow is returned to the caller for compaction instead of
//! being retried here.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use parking_lot::Mutex;

use pl_domain::cancel::CancelToken;
use pl_domain::convo::ToolCall;
use pl_domain::error::{Error, ErrorClass, Result};
use pl_domain::stream::StreamEvent;
use pl_domain::trace::TraceEvent;

use crate::registry::ProviderRegistry;
use crate::retry::RetryPolicy;
use crate::traits::{FragmentSink, ModelProvider, ModelRequest, ModelResponse};

pub struct ModelClient {
    registry: ProviderRegistry,
    /// Primary model followed by fallbacks, as `"endpoint/model"` refs.
    chain: Vec<String>,
    cooldowns: Mutex<HashMap<String, Instant>>,
    cooldown: Duration,
    retry: RetryPolicy,
    default_temperature: f32,
}

impl ModelClient {
    pub fn new(
        registry: ProviderRegistry,
        config: &pl_domain::config::ProvidersConfig,
    ) -> Self {
        let mut chain = vec![config.primary.clone()];
        chain.extend(config.fallbacks.iter().cloned());
        chain.retain(|m| !m.is_empty());

        Self {
            registry,
            chain,
            cooldowns: Mutex::new(HashMap::new()),
            cooldown: Duration::from_secs(config.cooldown_secs),
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                ..Default::default()
            },
            default_temperature: config.temperature,
        }
    }

    /// Context window of the model that would serve a request right now.
    pub fn context_window_tokens(&self, model_override: Option<&str>) -> usize {
        for model_ref in self.candidates(model_override) {
            if let Ok((provider, _)) = self.registry.resolve(&model_ref) {
                return provider.capabilities().context_window_tokens;
            }
        }
        128_000
    }

    /// One completion, streaming or not.
    ///
    /// With a fragment sink, events are forwarded as they arrive and the
    /// aggregate response is still returned. Retry/failover only applies
    /// while nothing has been forwarded yet — once fragments reached the
    /// caller, a mid-stream failure surfaces instead of replaying output.
    pub async fn complete(
        &self,
        mut req: ModelRequest,
        model_override: Option<&str>,
        sink: Option<&FragmentSink>,
        cancel: &CancelToken,
    ) -> Result<ModelResponse> {
        if req.temperature.is_none() {
            req.temperature = Some(self.default_temperature);
        }

        let candidates = self.usable_candidates(model_override);
        if candidates.is_empty() {
            return Err(Error::Config("no models configured".into()));
        }

        let mut last_err: Option<Error> = None;

        for (chain_idx, model_ref) in candidates.iter().enumerate() {
            let (provider, model_name) = match self.registry.resolve(model_ref) {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(model = %model_ref, error = %e, "unresolvable model, skipping");
                    last_err = Some(e);
                    continue;
                }
            };
            req.model = if model_name.is_empty() {
                None
            } else {
                Some(model_name)
            };

            let mut attempt: u32 = 0;
            loop {
                if cancel.is_cancelled() {
                    return Ok(cancelled_response(model_ref));
                }

                let start = Instant::now();
                let mut emitted = false;
                let result = self
                    .try_once(provider.as_ref(), &req, sink, cancel, &mut emitted)
                    .await;
                let duration_ms = start.elapsed().as_millis() as u64;

                match result {
                    Ok(response) => {
                        TraceEvent::ModelRequest {
                            model: model_ref.clone(),
                            streaming: sink.is_some(),
                            duration_ms,
                            prompt_tokens: response.usage.map(|u| u.prompt_tokens),
                            completion_tokens: response.usage.map(|u| u.completion_tokens),
                        }
                        .emit();
                        return Ok(response);
                    }
                    Err(e) => {
                        let class = e.class();
                        tracing::warn!(
                            model = %model_ref,
                            attempt,
                            class = ?class,
                            error = %e,
                            "model call failed"
                        );

                        // Context overflows go back to the runner for
                        // compaction; auth/schema errors surface untouched.
                        if matches!(
                            class,
                            ErrorClass::Context | ErrorClass::Auth | ErrorClass::BadRequest
                        ) {
                            return Err(e);
                        }

                        // Output already reached the caller: replaying the
                        // request would duplicate it.
                        if emitted {
                            return Err(e);
                        }

                        let retryable = class == ErrorClass::Retryable;
                        if retryable && !self.retry.exhausted(attempt) {
                            let retry_after = match &e {
                                Error::ModelRetryable { retry_after_ms, .. } => *retry_after_ms,
                                _ => None,
                            };
                            tokio::time::sleep(
                                self.retry.delay_for_attempt(attempt, retry_after),
                            )
                            .await;
                            attempt += 1;
                            last_err = Some(e);
                            continue;
                        }

                        // Budget spent (or fatal): cool this model down and
                        // move along the chain.
                        self.set_cooldown(model_ref);
                        if let Some(next) = candidates.get(chain_idx + 1) {
                            TraceEvent::ModelFallback {
                                from_model: model_ref.clone(),
                                to_model: next.clone(),
                                reason: e.to_string(),
                            }
                            .emit();
                        }
                        last_err = Some(e);
                        break;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Fatal("all models failed".into())))
    }

    // ── Internals ──────────────────────────────────────────────────

    async fn try_once(
        &self,
        provider: &dyn ModelProvider,
        req: &ModelRequest,
        sink: Option<&FragmentSink>,
        cancel: &CancelToken,
        emitted: &mut bool,
    ) -> Result<ModelResponse> {
        match sink {
            None => provider.complete(req).await,
            Some(sink) => {
                let mut stream = provider.complete_stream(req).await?;

                let mut content = String::new();
                let mut tool_calls: Vec<ToolCall> = Vec::new();
                // call_id → (name, argument buffer), for providers that
                // never emit ToolCallFinished.
                let mut partial: HashMap<String, (String, String)> = HashMap::new();
                let mut usage = None;
                let mut finish_reason = None;

                while let Some(event) = stream.next().await {
                    if cancel.is_cancelled() {
                        finish_reason = Some("cancelled".to_string());
                        break;
                    }
                    let event = event?;

                    match &event {
                        StreamEvent::Token { text } => content.push_str(text),
                        StreamEvent::ToolCallStarted { call_id, tool_name } => {
                            partial.insert(call_id.clone(), (tool_name.clone(), String::new()));
                        }
                        StreamEvent::ToolCallDelta { call_id, delta } => {
                            if let Some((_, args)) = partial.get_mut(call_id) {
                                args.push_str(delta);
                            }
                        }
                        StreamEvent::ToolCallFinished {
                            call_id,
                            tool_name,
                            arguments,
                        } => {
                            partial.remove(call_id);
                            tool_calls.push(ToolCall {
                                call_id: call_id.clone(),
                                tool_name: tool_name.clone(),
                                arguments: arguments.clone(),
                            });
                        }
                        StreamEvent::Done {
                            usage: u,
                            finish_reason: f,
                        } => {
                            usage = *u;
                            finish_reason = f.clone();
                        }
                        StreamEvent::Error { message } => {
                            let err = Error::ModelRetryable {
                                message: message.clone(),
                                retry_after_ms: None,
                            };
                            if sink.send(event.clone()).await.is_err() {
                                tracing::debug!("fragment sink closed");
                            }
                            return Err(err);
                        }
                    }

                    *emitted = true;
                    if sink.send(event).await.is_err() {
                        // Receiver went away (e.g. channel shut down); keep
                        // aggregating so the turn can still commit.
                        tracing::debug!("fragment sink closed; continuing aggregation");
                    }
                }

                // Assemble calls that only came through start/delta.
                for (call_id, (tool_name, args)) in partial.drain() {
                    let arguments = if args.trim().is_empty() {
                        serde_json::Value::Object(Default::default())
                    } else {
                        serde_json::from_str(&args).unwrap_or_else(|_| {
                            serde_json::Value::Object(Default::default())
                        })
                    };
                    tool_calls.push(ToolCall {
                        call_id,
                        tool_name,
                        arguments,
                    });
                }

                Ok(ModelResponse {
                    content,
                    tool_calls,
                    usage,
                    model: req.model.clone().unwrap_or_default(),
                    finish_reason,
                })
            }
        }
    }

    /// Candidate list for one request: the per-session override first, then
    /// the configured chain, deduplicated.
    fn candidates(&self, model_override: Option<&str>) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.chain.len() + 1);
        if let Some(over) = model_override {
            if !over.is_empty() {
                out.push(over.to_string());
            }
        }
        for m in &self.chain {
            if !out.contains(m) {
                out.push(m.clone());
            }
        }
        out
    }

    /// Candidates minus cooled-down models. When everything is cooling we
    /// try the full list anyway — refusing to answer is worse than poking a
    /// model early.
    fn usable_candidates(&self, model_override: Option<&str>) -> Vec<String> {
        let all = self.candidates(model_override);
        let now = Instant::now();
        let cooldowns = self.cooldowns.lock();
        let usable: Vec<String> = all
            .iter()
            .filter(|m| cooldowns.get(*m).map_or(true, |until| *until <= now))
            .cloned()
            .collect();
        if usable.is_empty() {
            all
        } else {
            usable
        }
    }

    fn set_cooldown(&self, model_ref: &str) {
        self.cooldowns
            .lock()
            .insert(model_ref.to_string(), Instant::now() + self.cooldown);
    }

    #[cfg(test)]
    fn cooled(&self, model_ref: &str) -> bool {
        self.cooldowns
            .lock()
            .get(model_ref)
            .map_or(false, |until| *until > Instant::now())
    }
}

fn cancelled_response(model_ref: &str) -> ModelResponse {
    ModelResponse {
        content: String::new(),
        tool_calls: Vec::new(),
        usage: None,
        model: model_ref.to_string(),
        finish_reason: Some("cancelled".into()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
