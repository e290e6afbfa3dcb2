//! Endpoint registry: builds one adapter per configured endpoint, with API
//! keys resolved through the secret store at startup.

use std::collections::HashMap;
use std::sync::Arc;

use pl_domain::config::{split_model_ref, EndpointKind, ProvidersConfig};
use pl_domain::error::{Error, Result};
use pl_domain::secrets::SecretStore;

use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::{ModelCapabilities, ModelProvider};

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
}

impl ProviderRegistry {
    pub async fn from_config(
        config: &ProvidersConfig,
        secrets: &dyn SecretStore,
    ) -> Result<Self> {
        let mut providers: HashMap<String, Arc<dyn ModelProvider>> = HashMap::new();

        for (id, endpoint) in &config.endpoints {
            let api_key = secrets.get(&endpoint.api_key_secret).await?;
            if api_key.is_none() {
                tracing::warn!(
                    endpoint = %id,
                    secret = %endpoint.api_key_secret,
                    "no API key found; endpoint will send unauthenticated requests"
                );
            }

            let capabilities = ModelCapabilities {
                supports_streaming: true,
                supports_cache_anchors: endpoint.supports_cache_anchors,
                context_window_tokens: endpoint.context_window_tokens,
                max_output_tokens: endpoint.max_output_tokens,
            };

            let provider: Arc<dyn ModelProvider> = match endpoint.kind {
                EndpointKind::OpenaiCompat => Arc::new(OpenAiCompatProvider::new(
                    id.clone(),
                    &endpoint.base_url,
                    api_key,
                    endpoint.default_model.clone(),
                    capabilities,
                    std::time::Duration::from_secs(config.request_timeout_secs),
                )?),
            };

            tracing::info!(
                endpoint = %id,
                base_url = %endpoint.base_url,
                default_model = %endpoint.default_model,
                cache_anchors = endpoint.supports_cache_anchors,
                "model endpoint ready"
            );
            providers.insert(id.clone(), provider);
        }

        Ok(Self { providers })
    }

    /// Build a registry from pre-constructed providers (tests, embedding).
    pub fn from_providers(providers: Vec<Arc<dyn ModelProvider>>) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|p| (p.endpoint_id().to_string(), p))
                .collect(),
        }
    }

    pub fn get(&self, endpoint_id: &str) -> Option<Arc<dyn ModelProvider>> {
        self.providers.get(endpoint_id).cloned()
    }

    /// Resolve a `"endpoint/model"` reference into an adapter plus the model
    /// name to request (empty = adapter default).
    pub fn resolve(&self, model_ref: &str) -> Result<(Arc<dyn ModelProvider>, String)> {
        let (endpoint, model) = split_model_ref(model_ref);
        let provider = self
            .get(endpoint)
            .ok_or_else(|| Error::Config(format!("unknown endpoint '{endpoint}' in '{model_ref}'")))?;
        Ok((provider, model.to_string()))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
