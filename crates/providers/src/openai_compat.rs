//! OpenAI-compatible adapter.
//!
//! Works with any endpoint following the OpenAI chat-completions contract
//! (hosted APIs, local inference servers, proxies). Streaming and
//! non-streaming share one body builder; only the `stream` flag differs.

use std::collections::BTreeMap;

use serde_json::Value;

use pl_domain::convo::{ContentPart, Message, MessageContent, Role, ToolCall, ToolSpec};
use pl_domain::error::{Error, Result};
use pl_domain::stream::{BoxStream, StreamEvent, Usage};

use crate::cache_marks;
use crate::classify::{classify_http, classify_transport, parse_retry_after};
use crate::sse::sse_response_stream;
use crate::traits::{ModelCapabilities, ModelProvider, ModelRequest, ModelResponse};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    capabilities: ModelCapabilities,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        id: impl Into<String>,
        base_url: &str,
        api_key: Option<String>,
        default_model: impl Into<String>,
        capabilities: ModelCapabilities,
        request_timeout: std::time::Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("building HTTP client: {e}")))?;

        Ok(Self {
            id: id.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.into(),
            capabilities,
            client,
        })
    }

    fn effective_model(&self, req: &ModelRequest) -> String {
        req.model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.default_model.clone())
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
    }

    fn build_chat_body(&self, req: &ModelRequest, stream: bool) -> Value {
        let annotate = req.cache && self.capabilities.supports_cache_anchors;
        let anchors = if annotate {
            cache_marks::anchor_indexes(&req.messages)
        } else {
            Vec::new()
        };

        let messages: Vec<Value> = req
            .messages
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let mut obj = msg_to_wire(m);
                if anchors.contains(&i) {
                    obj["cache_control"] = serde_json::json!({ "type": "ephemeral" });
                }
                obj
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.effective_model(req),
            "messages": messages,
            "stream": stream,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_output_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        body
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        Err(classify_http(status.as_u16(), &body, retry_after))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => tool_result_to_wire(msg),
        Role::Assistant => assistant_to_wire(msg),
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content.extract_all_text(),
        }),
    }
}

fn assistant_to_wire(msg: &Message) -> Value {
    let mut obj = serde_json::json!({ "role": "assistant" });
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t.clone()),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_parts.push(text.clone()),
                    ContentPart::ToolUse { id, name, input } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            }
                        }));
                    }
                    ContentPart::ToolResult { .. } => {}
                }
            }
        }
    }

    if text_parts.is_empty() {
        obj["content"] = Value::Null;
    } else {
        obj["content"] = Value::String(text_parts.join("\n"));
    }
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_wire(msg: &Message) -> Value {
    if let MessageContent::Parts(parts) = &msg.content {
        for part in parts {
            if let ContentPart::ToolResult {
                tool_use_id,
                content,
                ..
            } = part
            {
                return serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                });
            }
        }
    }
    serde_json::json!({
        "role": "tool",
        "tool_call_id": "",
        "content": msg.content.extract_all_text(),
    })
}

fn tool_to_wire(tool: &ToolSpec) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn usage_from_wire(value: &Value) -> Option<Usage> {
    let usage = value.get("usage")?;
    Some(Usage {
        prompt_tokens: usage.get("prompt_tokens")?.as_u64().unwrap_or(0) as u32,
        completion_tokens: usage
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        cached_tokens: usage
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming chunk assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-stream state: tool calls arrive as indexed fragments and must be
/// reassembled; usage arrives in a trailing chunk after `finish_reason`.
#[derive(Default)]
struct StreamState {
    /// choice tool-call index → (id, name, argument buffer)
    calls: BTreeMap<u64, (String, String, String)>,
    usage: Option<Usage>,
    finish_reason: Option<String>,
    flushed: bool,
}

impl StreamState {
    fn parse_chunk(&mut self, data: &str) -> Vec<Result<StreamEvent>> {
        if data == "[DONE]" {
            let mut events = self.flush_tool_calls();
            events.push(Ok(StreamEvent::Done {
                usage: self.usage,
                finish_reason: self.finish_reason.clone(),
            }));
            return events;
        }

        let chunk: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                return vec![Err(Error::ModelRetryable {
                    message: format!("malformed stream chunk: {e}"),
                    retry_after_ms: None,
                })]
            }
        };

        if let Some(usage) = usage_from_wire(&chunk) {
            self.usage = Some(usage);
        }

        let mut events = Vec::new();
        let choices = chunk.get("choices").and_then(|c| c.as_array());
        for choice in choices.into_iter().flatten() {
            if let Some(reason) = choice.get("finish_reason").and_then(|f| f.as_str()) {
                self.finish_reason = Some(reason.to_string());
            }
            let Some(delta) = choice.get("delta") else {
                continue;
            };

            if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
                if !text.is_empty() {
                    events.push(Ok(StreamEvent::Token { text: text.into() }));
                }
            }

            for tc in delta
                .get("tool_calls")
                .and_then(|t| t.as_array())
                .into_iter()
                .flatten()
            {
                let index = tc.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                let entry = self.calls.entry(index).or_default();
                if let Some(id) = tc.get("id").and_then(|i| i.as_str()) {
                    entry.0 = id.to_string();
                }
                if let Some(name) = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|n| n.as_str())
                {
                    if entry.1.is_empty() {
                        entry.1 = name.to_string();
                        events.push(Ok(StreamEvent::ToolCallStarted {
                            call_id: entry.0.clone(),
                            tool_name: name.to_string(),
                        }));
                    }
                }
                if let Some(args) = tc
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(|a| a.as_str())
                {
                    entry.2.push_str(args);
                    events.push(Ok(StreamEvent::ToolCallDelta {
                        call_id: entry.0.clone(),
                        delta: args.to_string(),
                    }));
                }
            }
        }

        events
    }

    fn flush_tool_calls(&mut self) -> Vec<Result<StreamEvent>> {
        if self.flushed {
            return Vec::new();
        }
        self.flushed = true;

        let calls = std::mem::take(&mut self.calls);
        calls
            .into_values()
            .map(|(id, name, args)| {
                let arguments = parse_args_lenient(&args, &name, &id);
                Ok(StreamEvent::ToolCallFinished {
                    call_id: id,
                    tool_name: name,
                    arguments,
                })
            })
            .collect()
    }
}

/// Arguments that fail to parse default to an empty object rather than
/// killing the stream — the tool layer's schema validation reports the
/// problem to the model as an observation.
fn parse_args_lenient(args: &str, tool_name: &str, call_id: &str) -> Value {
    if args.trim().is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str(args) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                call_id = %call_id,
                tool = %tool_name,
                error = %e,
                "tool call arguments are not valid JSON; defaulting to empty object"
            );
            Value::Object(Default::default())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ModelProvider for OpenAiCompatProvider {
    async fn complete(&self, req: &ModelRequest) -> Result<ModelResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, false);

        let response = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;
        let response = Self::check_status(response).await?;

        let json: Value = response
            .json()
            .await
            .map_err(|e| classify_transport(&e))?;

        let choice = json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| Error::ModelBadRequest("response has no choices".into()))?;
        let message = choice
            .get("message")
            .ok_or_else(|| Error::ModelBadRequest("choice has no message".into()))?;

        let content = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();

        let mut tool_calls = Vec::new();
        for tc in message
            .get("tool_calls")
            .and_then(|t| t.as_array())
            .into_iter()
            .flatten()
        {
            let call_id = tc
                .get("id")
                .and_then(|i| i.as_str())
                .unwrap_or_default()
                .to_string();
            let function = tc.get("function").cloned().unwrap_or_default();
            let tool_name = function
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .to_string();
            let args_raw = function
                .get("arguments")
                .and_then(|a| a.as_str())
                .unwrap_or_default();
            tool_calls.push(ToolCall {
                arguments: parse_args_lenient(args_raw, &tool_name, &call_id),
                call_id,
                tool_name,
            });
        }

        Ok(ModelResponse {
            content,
            tool_calls,
            usage: usage_from_wire(&json),
            model: json
                .get("model")
                .and_then(|m| m.as_str())
                .unwrap_or(&self.effective_model(req))
                .to_string(),
            finish_reason: choice
                .get("finish_reason")
                .and_then(|f| f.as_str())
                .map(String::from),
        })
    }

    async fn complete_stream(
        &self,
        req: &ModelRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, true);

        let response = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;
        let response = Self::check_status(response).await?;

        let mut state = StreamState::default();
        Ok(sse_response_stream(response, move |data| {
            state.parse_chunk(data)
        }))
    }

    fn capabilities(&self) -> &ModelCapabilities {
        &self.capabilities
    }

    fn endpoint_id(&self) -> &str {
        &self.id
    }
}
