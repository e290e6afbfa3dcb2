//! End-to-end turn scenarios against a scripted model provider and a
//! recording channel transport: single turns, tool round-trips, dedup,
//! interrupt mode, context-overflow recovery, containment denials, the
//! loop breaker, and streamed block delivery.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use pl_assistant::bootstrap::{build_state_with_registry, FileMemoryStore, InMemoryScheduler};
use pl_assistant::runtime::handle_inbound;
use pl_assistant::AppState;
use pl_domain::channel::{
    AttachmentRef, ChannelTransport, InboundMessage, OutboundPayload, SendErrorKind,
};
use pl_domain::config::{Config, ProviderEndpoint, QueueMode};
use pl_domain::convo::ToolCall;
use pl_domain::error::{Error, Result};
use pl_domain::stream::{BoxStream, StreamEvent, Usage};
use pl_domain::turn::{ToolOutcome, Turn};
use pl_providers::{
    ModelCapabilities, ModelProvider, ModelRequest, ModelResponse, ProviderRegistry,
};
use pl_sessions::SessionKey;
use pl_tools::registry::{ToolEntry, ToolHandler};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Step {
    Text {
        content: &'static str,
        usage: (u32, u32),
    },
    Tools(Vec<ToolCall>),
    Fail(fn() -> Error),
}

struct ScriptedModel {
    steps: Mutex<Vec<Step>>,
    calls: AtomicU32,
    delay: Duration,
    capabilities: ModelCapabilities,
    /// When the script runs dry, keep answering with this.
    default_reply: &'static str,
}

impl ScriptedModel {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Self::with_delay(steps, Duration::ZERO)
    }

    fn with_delay(steps: Vec<Step>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps),
            calls: AtomicU32::new(0),
            delay,
            capabilities: ModelCapabilities {
                supports_streaming: true,
                supports_cache_anchors: false,
                context_window_tokens: 128_000,
                max_output_tokens: 4_096,
            },
            default_reply: "ok",
        })
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock();
        if steps.is_empty() {
            Step::Text {
                content: self.default_reply,
                usage: (1, 1),
            }
        } else {
            steps.remove(0)
        }
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ModelProvider for ScriptedModel {
    async fn complete(&self, _req: &ModelRequest) -> Result<ModelResponse> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Step::Text { content, usage } => Ok(ModelResponse {
                content: content.into(),
                tool_calls: vec![],
                usage: Some(Usage {
                    prompt_tokens: usage.0,
                    completion_tokens: usage.1,
                    cached_tokens: 0,
                }),
                model: "scripted".into(),
                finish_reason: Some("stop".into()),
            }),
            Step::Tools(tool_calls) => Ok(ModelResponse {
                content: String::new(),
                tool_calls,
                usage: Some(Usage {
                    prompt_tokens: 5,
                    completion_tokens: 2,
                    cached_tokens: 0,
                }),
                model: "scripted".into(),
                finish_reason: Some("tool_calls".into()),
            }),
            Step::Fail(make) => Err(make()),
        }
    }

    async fn complete_stream(
        &self,
        req: &ModelRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        // Reuse the scripted outcome, re-emitted as word tokens.
        let response = self.complete(req).await?;
        let mut events: Vec<Result<StreamEvent>> = Vec::new();
        let mut rest = response.content.as_str();
        while !rest.is_empty() {
            let cut = rest
                .char_indices()
                .nth(6)
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            events.push(Ok(StreamEvent::Token {
                text: rest[..cut].to_string(),
            }));
            rest = &rest[cut..];
        }
        for call in &response.tool_calls {
            events.push(Ok(StreamEvent::ToolCallFinished {
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                arguments: call.arguments.clone(),
            }));
        }
        events.push(Ok(StreamEvent::Done {
            usage: response.usage,
            finish_reason: response.finish_reason,
        }));
        Ok(Box::pin(futures_util::stream::iter(events)))
    }

    fn capabilities(&self) -> &ModelCapabilities {
        &self.capabilities
    }

    fn endpoint_id(&self) -> &str {
        "mock"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Recording transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct RecordingTransport {
    sent: Mutex<Vec<OutboundPayload>>,
}

impl RecordingTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
        })
    }

    fn texts(&self) -> Vec<String> {
        self.sent.lock().iter().map(|p| p.text.clone()).collect()
    }
}

#[async_trait::async_trait]
impl ChannelTransport for RecordingTransport {
    fn id(&self) -> &str {
        "test"
    }

    async fn send(
        &self,
        _chat_id: &str,
        payload: OutboundPayload,
    ) -> std::result::Result<(), SendErrorKind> {
        self.sent.lock().push(payload);
        Ok(())
    }

    async fn download(&self, _att: &AttachmentRef) -> Result<(Vec<u8>, String)> {
        Ok((vec![], "application/octet-stream".into()))
    }

    fn max_block_chars(&self) -> usize {
        200
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Harness {
    state: AppState,
    transport: Arc<RecordingTransport>,
    model: Arc<ScriptedModel>,
    _tmp: tempfile::TempDir,
}

fn harness(model: Arc<ScriptedModel>, streaming: bool) -> Harness {
    harness_with(model, streaming, |_| {})
}

fn harness_with(
    model: Arc<ScriptedModel>,
    streaming: bool,
    tweak: impl FnOnce(&mut Config),
) -> Harness {
    let tmp = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.sessions.state_path = tmp.path().join("state");
    config.tools.workspace_root = tmp.path().join("workspace");
    config
        .providers
        .endpoints
        .insert("mock".into(), ProviderEndpoint::default());
    config.providers.primary = "mock/scripted".into();
    config.access.allowlist = vec!["alice".into()];
    config.access.admins = vec!["root".into()];
    config.runtime.streaming.enabled = streaming;
    config.runtime.streaming.idle_ms = 40;
    config.queue.debounce_ms = 30;
    tweak(&mut config);

    let registry =
        ProviderRegistry::from_providers(vec![model.clone() as Arc<dyn ModelProvider>]);
    let memory = Arc::new(FileMemoryStore::open(&config.sessions.state_path).unwrap());
    let (state, _approval_rx) = build_state_with_registry(
        config,
        registry,
        memory,
        Arc::new(InMemoryScheduler::default()),
    )
    .unwrap();

    let transport = RecordingTransport::new();
    state.attach_transport(transport.clone());

    Harness {
        state,
        transport,
        model,
        _tmp: tmp,
    }
}

fn inbound(content: &str) -> InboundMessage {
    InboundMessage {
        channel_id: "test".into(),
        chat_id: "chatX".into(),
        from_id: "alice".into(),
        is_group: false,
        content: content.into(),
        attachments: vec![],
        reply_to: None,
        msg_id: uuid::Uuid::new_v4().to_string(),
        received_at: chrono::Utc::now(),
    }
}

fn key() -> SessionKey {
    SessionKey::main("test", "chatX")
}

/// Wait until the session is idle with nothing queued.
async fn settle(state: &AppState) {
    let key_str = key().to_string();
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if !state.queue.is_processing(&key_str) && state.queue.pending_len(&key_str) == 0 {
            // One extra beat for post-run commits.
            tokio::time::sleep(Duration::from_millis(20)).await;
            return;
        }
    }
    panic!("session never settled");
}

fn history(state: &AppState) -> Vec<Turn> {
    state
        .sessions
        .get(&key())
        .map(|arc| arc.read().history.clone())
        .unwrap_or_default()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn single_turn_no_tools() {
    let model = ScriptedModel::new(vec![Step::Text {
        content: "hi there",
        usage: (10, 3),
    }]);
    let h = harness(model, false);

    handle_inbound(&h.state, inbound("hello")).await;
    settle(&h.state).await;

    let turns = history(&h.state);
    assert_eq!(turns.len(), 2);
    assert!(matches!(&turns[0], Turn::User { text, .. } if text == "hello"));
    assert!(matches!(&turns[1], Turn::Assistant { text, .. } if text == "hi there"));

    let session = h.state.sessions.get(&key()).unwrap();
    assert_eq!(session.read().usage.total(), 13);

    assert_eq!(h.transport.texts(), vec!["hi there".to_string()]);
    assert_eq!(h.model.call_count(), 1);
}

#[tokio::test]
async fn one_tool_call_then_answer() {
    struct Add;

    #[async_trait::async_trait]
    impl ToolHandler for Add {
        async fn handle(
            &self,
            args: &serde_json::Value,
            _ctx: &pl_tools::ToolCtx,
        ) -> Result<String> {
            let a = args["a"].as_i64().unwrap_or(0);
            let b = args["b"].as_i64().unwrap_or(0);
            Ok((a + b).to_string())
        }
    }

    let model = ScriptedModel::new(vec![
        Step::Tools(vec![ToolCall {
            call_id: "t1".into(),
            tool_name: "add".into(),
            arguments: serde_json::json!({"a": 1, "b": 2}),
        }]),
        Step::Text {
            content: "1+2=3",
            usage: (12, 4),
        },
    ]);
    let h = harness(model, false);
    h.state.registry.register(ToolEntry {
        spec: pl_domain::convo::ToolSpec {
            name: "add".into(),
            description: "add two numbers".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "a": { "type": "integer" },
                    "b": { "type": "integer" }
                },
                "required": ["a", "b"]
            }),
        },
        handler: Arc::new(Add),
        stateful: false,
        requires_confirmation: false,
    });

    handle_inbound(&h.state, inbound("what is 1+2?")).await;
    settle(&h.state).await;

    let turns = history(&h.state);
    assert_eq!(turns.len(), 4, "user, assistant+calls, observation, answer");
    assert!(matches!(&turns[1], Turn::Assistant { tool_calls, .. } if tool_calls.len() == 1));
    match &turns[2] {
        Turn::Tool { observation, .. } => {
            assert_eq!(observation.call_id, "t1");
            assert_eq!(observation.content, "3");
            assert_eq!(observation.outcome, ToolOutcome::Ok);
        }
        other => panic!("expected tool observation, got {other:?}"),
    }
    assert!(matches!(&turns[3], Turn::Assistant { text, .. } if text == "1+2=3"));
    assert_eq!(h.model.call_count(), 2);
}

#[tokio::test]
async fn duplicate_within_window_runs_once() {
    let model = ScriptedModel::with_delay(
        vec![Step::Text {
            content: "pong",
            usage: (2, 1),
        }],
        Duration::from_millis(150),
    );
    let h = harness(model, false);

    handle_inbound(&h.state, inbound("ping")).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    handle_inbound(&h.state, inbound("ping")).await;
    settle(&h.state).await;

    assert_eq!(h.model.call_count(), 1, "exactly one run for 'ping'");
    let turns = history(&h.state);
    let users = turns.iter().filter(|t| t.is_user()).count();
    assert_eq!(users, 1);
}

#[tokio::test]
async fn interrupt_mode_cancels_and_replaces() {
    let model = ScriptedModel::with_delay(
        vec![
            Step::Text {
                content: "working on the long task",
                usage: (5, 5),
            },
            Step::Text {
                content: "stopped as asked",
                usage: (3, 2),
            },
        ],
        Duration::from_millis(200),
    );
    let h = harness_with(model, false, |config| {
        config.queue.default_mode = QueueMode::Interrupt;
    });

    handle_inbound(&h.state, inbound("long task")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.state.queue.is_processing(&key().to_string()));

    handle_inbound(&h.state, inbound("stop")).await;
    settle(&h.state).await;

    let turns = history(&h.state);
    let texts: Vec<&str> = turns.iter().map(|t| t.text()).collect();
    assert!(texts.contains(&"long task"));
    assert!(texts.contains(&"stop"));
    // The interrupted run committed no assistant turn; only the reply to
    // "stop" did.
    let assistants: Vec<&str> = turns
        .iter()
        .filter(|t| matches!(t, Turn::Assistant { .. }))
        .map(|t| t.text())
        .collect();
    assert_eq!(assistants, vec!["stopped as asked"]);
}

#[tokio::test]
async fn context_overflow_compacts_and_recovers() {
    let model = ScriptedModel::new(vec![
        Step::Fail(|| Error::ModelContext("context length exceeded".into())),
        // Memory-flush turn: nothing to save.
        Step::Text {
            content: "nothing",
            usage: (1, 1),
        },
        // Range summary.
        Step::Text {
            content: "They exchanged greetings and counted messages.",
            usage: (8, 8),
        },
        // Retried turn.
        Step::Text {
            content: "recovered",
            usage: (6, 2),
        },
    ]);
    let h = harness(model, false);

    // Seed enough history for the summarize strategy to engage.
    for i in 0..11 {
        h.state
            .sessions
            .commit_turn(&key(), Turn::user(format!("old message {i}")));
    }

    handle_inbound(&h.state, inbound("hello again")).await;
    settle(&h.state).await;

    let turns = history(&h.state);
    assert!(
        turns[0].is_summary(),
        "history must begin with the synthetic summary turn"
    );
    let summaries = turns.iter().filter(|t| t.is_summary()).count();
    assert_eq!(summaries, 1);
    assert!(matches!(
        turns.last().unwrap(),
        Turn::Assistant { text, .. } if text == "recovered"
    ));
    assert_eq!(h.model.call_count(), 4);
}

#[tokio::test]
async fn containment_violation_is_observed_not_executed() {
    let model = ScriptedModel::new(vec![
        Step::Tools(vec![ToolCall {
            call_id: "t9".into(),
            tool_name: "read_file".into(),
            arguments: serde_json::json!({"path": "../../etc/passwd"}),
        }]),
        Step::Text {
            content: "that file is off limits",
            usage: (4, 4),
        },
    ]);
    let h = harness(model, false);

    handle_inbound(&h.state, inbound("read /etc/passwd please")).await;
    settle(&h.state).await;

    let turns = history(&h.state);
    let observation = turns
        .iter()
        .find_map(|t| match t {
            Turn::Tool { observation, .. } => Some(observation),
            _ => None,
        })
        .expect("a tool observation");
    assert_eq!(observation.outcome, ToolOutcome::Denied);
    assert_eq!(observation.content, "blocked: path escapes workspace");

    // Audit entry landed.
    let audit = std::fs::read_to_string(
        h.state.config.sessions.state_path.join("audit.jsonl"),
    )
    .unwrap();
    assert!(audit.contains("read_file"));
    assert!(audit.contains("denied"));
}

#[tokio::test]
async fn loop_breaker_terminates_run() {
    let repeated = ToolCall {
        call_id: "t1".into(),
        tool_name: "list_dir".into(),
        arguments: serde_json::json!({"path": "."}),
    };
    // list_dir is a known polling tool (factor 2): 13 identical calls put
    // the effective count past the circuit-breaker threshold of 25.
    let steps: Vec<Step> = (0..20)
        .map(|_| Step::Tools(vec![repeated.clone()]))
        .collect();
    let h = harness(ScriptedModel::new(steps), false);

    handle_inbound(&h.state, inbound("poll forever")).await;
    settle(&h.state).await;

    let texts = h.transport.texts();
    assert!(
        texts.iter().any(|t| t.contains("loop")),
        "user must see the loop failure, got {texts:?}"
    );
    assert!(h.model.call_count() < 20, "run must stop before the script runs dry");
}

#[tokio::test]
async fn streaming_blocks_prefix_final_text() {
    let model = ScriptedModel::new(vec![Step::Text {
        content: "First sentence of the reply. Second sentence follows it. Third one closes the thought nicely.",
        usage: (10, 20),
    }]);
    let h = harness(model, true);

    handle_inbound(&h.state, inbound("tell me something")).await;
    settle(&h.state).await;
    // Give the streamer task its final flush.
    tokio::time::sleep(Duration::from_millis(120)).await;

    let sent = h.transport.texts();
    assert!(!sent.is_empty());
    let joined = sent.join(" ");
    let normalized: Vec<&str> = joined.split_whitespace().collect();
    let expected: Vec<&str> = "First sentence of the reply. Second sentence follows it. Third one closes the thought nicely."
        .split_whitespace()
        .collect();
    assert_eq!(normalized, expected);

    // Only the first block replies to the original message.
    let payloads = h.transport.sent.lock();
    assert!(payloads[0].reply_to.is_some());
    assert!(payloads[1..].iter().all(|p| p.reply_to.is_none()));
}

#[tokio::test]
async fn guest_messages_are_dropped_silently() {
    let model = ScriptedModel::new(vec![]);
    let h = harness(model, false);

    let mut msg = inbound("let me in");
    msg.from_id = "mallory".into();
    handle_inbound(&h.state, msg).await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(h.model.call_count(), 0);
    assert!(h.transport.texts().is_empty());
    assert!(history(&h.state).is_empty());
}

#[tokio::test]
async fn empty_message_rejected_without_model_call() {
    let model = ScriptedModel::new(vec![]);
    let h = harness(model, false);

    handle_inbound(&h.state, inbound("   ")).await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(h.model.call_count(), 0);
    let texts = h.transport.texts();
    assert_eq!(texts.len(), 1, "polite rejection expected");
}

#[tokio::test]
async fn admin_commands_round_trip() {
    let model = ScriptedModel::new(vec![]);
    let h = harness(model, false);

    handle_inbound(&h.state, inbound("/think high")).await;
    handle_inbound(&h.state, inbound("/queue collect")).await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    let session = h.state.sessions.get(&key()).unwrap();
    let overrides = session.read().overrides.clone();
    assert_eq!(
        overrides.thinking,
        Some(pl_domain::config::ThinkingLevel::High)
    );
    assert_eq!(overrides.queue_mode, Some(QueueMode::Collect));
    assert_eq!(h.model.call_count(), 0, "commands never reach the model");

    // /approve is admin-only; alice is a member.
    handle_inbound(&h.state, inbound("/approve 123")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let texts = h.transport.texts();
    assert!(texts.iter().any(|t| t.contains("admin")));
}

#[tokio::test]
async fn collect_mode_batches_followups() {
    let model = ScriptedModel::with_delay(
        vec![
            Step::Text {
                content: "first answer",
                usage: (3, 2),
            },
            Step::Text {
                content: "batched answer",
                usage: (3, 2),
            },
        ],
        Duration::from_millis(150),
    );
    let h = harness_with(model, false, |config| {
        config.queue.default_mode = QueueMode::Collect;
    });

    handle_inbound(&h.state, inbound("kick off")).await;
    tokio::time::sleep(Duration::from_millis(40)).await;
    handle_inbound(&h.state, inbound("also this")).await;
    handle_inbound(&h.state, inbound("and this")).await;
    settle(&h.state).await;

    // Two runs: the original message, then the collected pair as one batch.
    assert_eq!(h.model.call_count(), 2);
    let turns = history(&h.state);
    let users = turns.iter().filter(|t| t.is_user()).count();
    let assistants = turns
        .iter()
        .filter(|t| matches!(t, Turn::Assistant { .. }))
        .count();
    assert_eq!(users, 3, "each message commits its own user turn");
    assert_eq!(assistants, 2, "the followups share one reply");
}

#[tokio::test]
async fn new_command_rotates_the_branch() {
    let model = ScriptedModel::new(vec![Step::Text {
        content: "fresh start",
        usage: (2, 1),
    }]);
    let h = harness(model, false);

    handle_inbound(&h.state, inbound("/new")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.state.branch_for("test", "chatX"), "b2");

    handle_inbound(&h.state, inbound("hello on the new branch")).await;
    // Wait on the rotated session key.
    let new_key = SessionKey::new("test", "chatX", "b2");
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let done = h
            .state
            .sessions
            .get(&new_key)
            .map(|arc| arc.read().history.len() >= 2)
            .unwrap_or(false);
        if done {
            break;
        }
    }

    let session = h.state.sessions.get(&new_key).expect("rotated session exists");
    let history = session.read().history.clone();
    assert_eq!(history.len(), 2);
    // The old branch is untouched.
    assert!(h.state.sessions.get(&key()).is_none());
}

#[tokio::test]
async fn scheduled_job_runs_as_cron_turn() {
    let model = ScriptedModel::new(vec![Step::Text {
        content: "daily summary delivered",
        usage: (4, 2),
    }]);
    let h = harness(model, false);

    pl_assistant::runtime::orchestrator::spawn_job_turn(
        &h.state,
        pl_domain::schedule::JobSpec {
            channel_id: "test".into(),
            chat_id: "chatX".into(),
            prompt: "write the daily summary".into(),
        },
    );
    // Give the cron lane a beat to claim the session before polling.
    tokio::time::sleep(Duration::from_millis(50)).await;
    settle(&h.state).await;

    let turns = history(&h.state);
    assert_eq!(turns.len(), 2);
    assert!(matches!(
        &turns[0],
        Turn::User { text, .. } if text.starts_with("[scheduled task]")
    ));
    assert_eq!(h.transport.texts(), vec!["daily summary delivered".to_string()]);
}

#[tokio::test]
async fn preventive_compaction_fires_at_threshold() {
    let model = ScriptedModel::new(vec![
        Step::Text {
            content: "noted",
            usage: (2, 1),
        },
        // Memory flush + summary for the preventive compaction.
        Step::Text {
            content: "nothing",
            usage: (1, 1),
        },
        Step::Text {
            content: "A long chat, summarized.",
            usage: (4, 4),
        },
    ]);
    let h = harness_with(model, false, |config| {
        config.sessions.max_turns = 20; // preventive threshold = 16
    });

    for i in 0..15 {
        h.state
            .sessions
            .commit_turn(&key(), Turn::user(format!("filler {i}")));
    }

    handle_inbound(&h.state, inbound("one more")).await;
    settle(&h.state).await;

    let turns = history(&h.state);
    assert!(
        turns.len() < 17,
        "history must have been compacted, got {} turns",
        turns.len()
    );
    assert!(turns[0].is_summary());
}
