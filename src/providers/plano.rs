//! Plano aggregator adapter
//!
//! The aggregator speaks the chat-completions schema, so request and response
//! translation are identical to the OpenAI adapter. Authentication differs:
//! the aggregator holds the upstream credentials itself, so no API key header
//! is injected here.

use async_trait::async_trait;

use super::openai::forward_chat;
use super::{ForwardRequest, ProviderAdapter, ProviderError, ProviderResponse};
use crate::config::ProviderConfig;

pub struct PlanoAdapter {
    name: String,
    endpoint: String,
    client: reqwest::Client,
}

impl PlanoAdapter {
    pub fn new(name: &str, config: &ProviderConfig, client: reqwest::Client) -> Self {
        if !config.keys().is_empty() {
            tracing::warn!(
                provider = name,
                "api keys configured for a plano provider are ignored (the aggregator authenticates upstream)"
            );
        }
        Self {
            name: name.to_string(),
            endpoint: config.endpoint_url(),
            client,
        }
    }
}

#[async_trait]
impl ProviderAdapter for PlanoAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn forward(&self, req: ForwardRequest) -> Result<ProviderResponse, ProviderError> {
        forward_chat(&self.name, &self.client, &self.endpoint, None, req).await
    }
}
