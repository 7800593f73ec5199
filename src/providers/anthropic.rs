//! Native Anthropic adapter
//!
//! The canonical shape matches the upstream wire format, so the body is
//! forwarded verbatim (re-serialized from the canonical struct the pipeline
//! already parsed). Response bytes stream through unchanged; usage and timing
//! extraction happen in the pipeline's recorder.

use std::time::Instant;

use async_trait::async_trait;

use super::{
    copy_headers, spawn_streaming_body, ForwardRequest, KeyRing, ProviderAdapter, ProviderBody,
    ProviderError, ProviderResponse,
};
use crate::config::ProviderConfig;
use crate::messages::ErrorEnvelope;

pub struct AnthropicAdapter {
    name: String,
    endpoint: String,
    version: Option<String>,
    keys: KeyRing,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(name: &str, config: &ProviderConfig, client: reqwest::Client) -> Self {
        Self {
            name: name.to_string(),
            endpoint: config.endpoint_url(),
            version: config.version.clone(),
            keys: KeyRing::new(config.keys()),
            client,
        }
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn forward(&self, req: ForwardRequest) -> Result<ProviderResponse, ProviderError> {
        let streaming = req.request.is_streaming();
        let body = serde_json::to_vec(&req.request)
            .map_err(|e| ProviderError::Translation(e.to_string()))?;

        let mut builder = self.client.post(&self.endpoint);
        builder = copy_headers(builder, &req.headers);
        if let Some(key) = self.keys.next() {
            builder = builder.header("x-api-key", key);
        }
        if let Some(version) = &self.version {
            builder = builder.header("anthropic-version", version);
        }
        builder = builder.header("content-type", "application/json");

        let dispatch = Instant::now();
        let response = builder.body(body).send().await?;
        let status = response.status().as_u16();

        if !(200..300).contains(&status) {
            let first_byte_ms = dispatch.elapsed().as_millis() as u64;
            let body = response.bytes().await.unwrap_or_default();
            let envelope = ErrorEnvelope::from_upstream(status, &body);
            tracing::warn!(
                provider = %self.name,
                status,
                error_type = %envelope.error.error_type,
                "Upstream error"
            );
            return Ok(ProviderResponse::error(status, &envelope, first_byte_ms));
        }

        if streaming {
            let (body, first_byte_ms) =
                spawn_streaming_body(response.bytes_stream(), None, dispatch).await;
            Ok(ProviderResponse {
                status,
                content_type: "text/event-stream",
                body,
                first_byte_ms,
            })
        } else {
            let first_byte_ms = dispatch.elapsed().as_millis() as u64;
            let bytes = response.bytes().await?;
            Ok(ProviderResponse {
                status,
                content_type: "application/json",
                body: ProviderBody::Buffered(bytes),
                first_byte_ms,
            })
        }
    }
}
