use pl_domain::convo::{Message, ToolCall, ToolSpec};
use pl_domain::error::Result;
use pl_domain::stream::{BoxStream, StreamEvent, Usage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic completion request.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    /// Tool schemas the model may invoke.
    pub tools: Vec<ToolSpec>,
    /// Sampling temperature. `None` lets the endpoint choose.
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    /// Model identifier override. `None` uses the endpoint's default.
    pub model: Option<String>,
    /// Ask for ephemeral prompt-cache annotation. Adapters whose endpoint
    /// does not support it ignore the flag.
    pub cache: bool,
}

/// A provider-agnostic completion response.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    /// The model that actually produced the response.
    pub model: String,
    /// Why generation stopped (`"stop"`, `"tool_calls"`, `"cancelled"`).
    pub finish_reason: Option<String>,
}

/// Where streamed fragments go. The block streamer sits on the other end.
pub type FragmentSink = tokio::sync::mpsc::Sender<StreamEvent>;

/// Advertised capabilities of one endpoint/model combination.
#[derive(Debug, Clone)]
pub struct ModelCapabilities {
    pub supports_streaming: bool,
    pub supports_cache_anchors: bool,
    pub context_window_tokens: usize,
    pub max_output_tokens: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every model adapter implements. Streaming and non-streaming share
/// one request builder inside each adapter; the failover client picks the
/// mode.
#[async_trait::async_trait]
pub trait ModelProvider: Send + Sync {
    /// Send a completion request and wait for the full response.
    async fn complete(&self, req: &ModelRequest) -> Result<ModelResponse>;

    /// Send a completion request and stream events. The stream ends with a
    /// [`StreamEvent::Done`] terminator sentinel.
    async fn complete_stream(
        &self,
        req: &ModelRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    fn capabilities(&self) -> &ModelCapabilities;

    /// Endpoint id this adapter serves.
    fn endpoint_id(&self) -> &str;
}
