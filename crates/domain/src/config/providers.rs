use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// Any endpoint following the OpenAI chat-completions contract.
    #[default]
    OpenaiCompat,
}

/// One configured model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    #[serde(default)]
    pub kind: EndpointKind,
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Secret name (resolved through the secret store) holding the API key.
    #[serde(default = "d_api_key_secret")]
    pub api_key_secret: String,
    #[serde(default = "d_default_model")]
    pub default_model: String,
    /// Whether the endpoint honors ephemeral prompt-cache annotations.
    #[serde(default)]
    pub supports_cache_anchors: bool,
    #[serde(default = "d_context_window")]
    pub context_window_tokens: usize,
    #[serde(default = "d_max_output")]
    pub max_output_tokens: u32,
}

impl Default for ProviderEndpoint {
    fn default() -> Self {
        Self {
            kind: EndpointKind::default(),
            base_url: d_base_url(),
            api_key_secret: d_api_key_secret(),
            default_model: d_default_model(),
            supports_cache_anchors: false,
            context_window_tokens: d_context_window(),
            max_output_tokens: d_max_output(),
        }
    }
}

fn d_base_url() -> String {
    "http://localhost:11434/v1".into()
}
fn d_api_key_secret() -> String {
    "PARLEY_API_KEY".into()
}
fn d_default_model() -> String {
    "gpt-4o-mini".into()
}
fn d_context_window() -> usize {
    128_000
}
fn d_max_output() -> u32 {
    8_192
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Endpoint id → endpoint settings.
    #[serde(default)]
    pub endpoints: HashMap<String, ProviderEndpoint>,
    /// Primary model as `"endpoint/model"` (or bare endpoint id).
    #[serde(default)]
    pub primary: String,
    /// Ordered fallback models consulted when the primary exhausts its
    /// retry budget.
    #[serde(default)]
    pub fallbacks: Vec<String>,
    /// How long a failed model is skipped before being eligible again.
    #[serde(default = "d_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Retry attempts per model before moving down the chain.
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "d_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            endpoints: HashMap::new(),
            primary: String::new(),
            fallbacks: Vec::new(),
            cooldown_secs: d_cooldown_secs(),
            max_attempts: d_max_attempts(),
            request_timeout_secs: d_request_timeout_secs(),
            temperature: d_temperature(),
        }
    }
}

fn d_cooldown_secs() -> u64 {
    120
}
fn d_max_attempts() -> u32 {
    3
}
fn d_request_timeout_secs() -> u64 {
    120
}
fn d_temperature() -> f32 {
    0.2
}
