//! Failover-client integration: streaming aggregation, fragment
//! forwarding, retry gating once output has been emitted, and tool-call
//! assembly for providers that never send a `finished` event.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use pl_domain::cancel::CancelToken;
use pl_domain::error::{Error, Result};
use pl_domain::stream::{BoxStream, StreamEvent, Usage};
use pl_providers::{
    ModelCapabilities, ModelClient, ModelProvider, ModelRequest, ModelResponse, ProviderRegistry,
};

/// One scripted stream per call; a call past the script fails.
struct StreamScript {
    id: &'static str,
    scripts: Mutex<Vec<Vec<Result<StreamEvent>>>>,
    calls: AtomicU32,
    capabilities: ModelCapabilities,
}

impl StreamScript {
    fn new(id: &'static str, scripts: Vec<Vec<Result<StreamEvent>>>) -> Arc<Self> {
        Arc::new(Self {
            id,
            scripts: Mutex::new(scripts),
            calls: AtomicU32::new(0),
            capabilities: ModelCapabilities {
                supports_streaming: true,
                supports_cache_anchors: false,
                context_window_tokens: 8_000,
                max_output_tokens: 1_000,
            },
        })
    }
}

#[async_trait::async_trait]
impl ModelProvider for StreamScript {
    async fn complete(&self, _req: &ModelRequest) -> Result<ModelResponse> {
        unimplemented!("streaming tests only")
    }

    async fn complete_stream(
        &self,
        _req: &ModelRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock();
        if scripts.is_empty() {
            return Err(Error::ModelRetryable {
                message: "script exhausted".into(),
                retry_after_ms: None,
            });
        }
        let events = scripts.remove(0);
        Ok(Box::pin(futures_util::stream::iter(events)))
    }

    fn capabilities(&self) -> &ModelCapabilities {
        &self.capabilities
    }

    fn endpoint_id(&self) -> &str {
        self.id
    }
}

fn token(text: &str) -> Result<StreamEvent> {
    Ok(StreamEvent::Token { text: text.into() })
}

fn done() -> Result<StreamEvent> {
    Ok(StreamEvent::Done {
        usage: Some(Usage {
            prompt_tokens: 7,
            completion_tokens: 3,
            cached_tokens: 2,
        }),
        finish_reason: Some("stop".into()),
    })
}

fn client_for(provider: Arc<StreamScript>) -> ModelClient {
    let mut config = pl_domain::config::ProvidersConfig {
        primary: format!("{}/m", provider.id),
        max_attempts: 2,
        ..Default::default()
    };
    config.endpoints.insert(
        provider.id.to_string(),
        pl_domain::config::ProviderEndpoint::default(),
    );
    let registry = ProviderRegistry::from_providers(vec![provider as Arc<dyn ModelProvider>]);
    ModelClient::new(registry, &config)
}

async fn drain(rx: &mut tokio::sync::mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn streaming_forwards_fragments_and_aggregates() {
    let provider = StreamScript::new(
        "a",
        vec![vec![token("Hel"), token("lo "), token("there"), done()]],
    );
    let client = client_for(provider);

    let (tx, mut rx) = tokio::sync::mpsc::channel(32);
    let response = client
        .complete(
            ModelRequest::default(),
            None,
            Some(&tx),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.content, "Hello there");
    let usage = response.usage.unwrap();
    assert_eq!(usage.prompt_tokens, 7);
    assert_eq!(usage.cached_tokens, 2);

    let events = drain(&mut rx).await;
    let tokens: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Token { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(tokens, "Hello there");
    assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
}

#[tokio::test]
async fn mid_stream_failure_after_output_does_not_retry() {
    let provider = StreamScript::new(
        "a",
        vec![
            vec![
                token("partial "),
                Err(Error::ModelRetryable {
                    message: "connection reset".into(),
                    retry_after_ms: None,
                }),
            ],
            // Would succeed if (wrongly) retried.
            vec![token("should not appear"), done()],
        ],
    );
    let calls = provider.clone();
    let client = client_for(provider);

    let (tx, _rx) = tokio::sync::mpsc::channel(32);
    let err = client
        .complete(
            ModelRequest::default(),
            None,
            Some(&tx),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ModelRetryable { .. }));
    assert_eq!(calls.calls.load(Ordering::SeqCst), 1, "no replay after output");
}

#[tokio::test]
async fn connect_phase_failure_retries_cleanly() {
    // First call dies before producing anything; the retry streams fully.
    let provider = StreamScript::new(
        "a",
        vec![
            vec![Err(Error::ModelRetryable {
                message: "HTTP 503".into(),
                retry_after_ms: Some(1),
            })],
            vec![token("second try"), done()],
        ],
    );
    let calls = provider.clone();
    let client = client_for(provider);

    let (tx, mut rx) = tokio::sync::mpsc::channel(32);
    let response = client
        .complete(
            ModelRequest::default(),
            None,
            Some(&tx),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.content, "second try");
    assert_eq!(calls.calls.load(Ordering::SeqCst), 2);

    // Only the successful attempt's fragments reached the sink... plus the
    // error event from the failed stream is allowed ahead of them.
    let texts: Vec<String> = drain(&mut rx)
        .await
        .into_iter()
        .filter_map(|e| match e {
            StreamEvent::Token { text } => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(texts.join(""), "second try");
}

#[tokio::test]
async fn assembles_tool_calls_without_finished_events() {
    let provider = StreamScript::new(
        "a",
        vec![vec![
            Ok(StreamEvent::ToolCallStarted {
                call_id: "t1".into(),
                tool_name: "read_file".into(),
            }),
            Ok(StreamEvent::ToolCallDelta {
                call_id: "t1".into(),
                delta: "{\"path\":".into(),
            }),
            Ok(StreamEvent::ToolCallDelta {
                call_id: "t1".into(),
                delta: "\"notes.md\"}".into(),
            }),
            done(),
        ]],
    );
    let client = client_for(provider);

    let (tx, _rx) = tokio::sync::mpsc::channel(32);
    let response = client
        .complete(
            ModelRequest::default(),
            None,
            Some(&tx),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.tool_calls.len(), 1);
    let call = &response.tool_calls[0];
    assert_eq!(call.call_id, "t1");
    assert_eq!(call.tool_name, "read_file");
    assert_eq!(call.arguments["path"], "notes.md");
}

#[tokio::test]
async fn cancellation_mid_stream_returns_partial() {
    let provider = StreamScript::new("a", vec![vec![token("started "), token("but"), done()]]);
    let client = client_for(provider);

    let cancel = CancelToken::new();
    let (tx, mut rx) = tokio::sync::mpsc::channel(32);

    // Cancel as soon as the first fragment lands.
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if rx.recv().await.is_some() {
                cancel.cancel();
            }
            // Keep draining so the sender never blocks.
            while rx.recv().await.is_some() {}
        })
    };

    let response = client
        .complete(ModelRequest::default(), None, Some(&tx), &cancel)
        .await
        .unwrap();
    drop(tx);
    let _ = canceller.await;

    assert_eq!(response.finish_reason.as_deref(), Some("cancelled"));
    assert!(response.content.starts_with("started"));
}
