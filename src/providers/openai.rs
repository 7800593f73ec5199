//! OpenAI chat-completions adapter
//!
//! Canonical requests are rewritten into the chat-completions schema before
//! dispatch; responses are translated back, either as one buffered message or
//! chunk-by-chunk through the SSE state machine. The client model name is
//! preserved end to end so the caller sees the model it asked for.

use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;

use super::{
    spawn_streaming_body, ForwardRequest, KeyRing, ProviderAdapter, ProviderBody, ProviderError,
    ProviderResponse,
};
use crate::config::ProviderConfig;
use crate::messages::ErrorEnvelope;
use crate::translation::{self, StreamTranslator};

pub struct OpenAiAdapter {
    name: String,
    endpoint: String,
    keys: KeyRing,
    client: reqwest::Client,
}

impl OpenAiAdapter {
    pub fn new(name: &str, config: &ProviderConfig, client: reqwest::Client) -> Self {
        Self {
            name: name.to_string(),
            endpoint: config.endpoint_url(),
            keys: KeyRing::new(config.keys()),
            client,
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn forward(&self, req: ForwardRequest) -> Result<ProviderResponse, ProviderError> {
        forward_chat(
            &self.name,
            &self.client,
            &self.endpoint,
            self.keys.next().map(|k| format!("Bearer {}", k)),
            req,
        )
        .await
    }
}

/// Shared chat-completions forwarding used by the OpenAI and Plano adapters.
///
/// `auth_header` is the full `Authorization` value, or None when the upstream
/// handles authentication itself.
pub(super) async fn forward_chat(
    provider: &str,
    client: &reqwest::Client,
    endpoint: &str,
    auth_header: Option<String>,
    req: ForwardRequest,
) -> Result<ProviderResponse, ProviderError> {
    let streaming = req.request.is_streaming();
    // Translated responses report the model the client asked for
    let client_model = req
        .original_model
        .clone()
        .unwrap_or_else(|| req.request.model.clone());

    let openai_request = translation::to_openai(&req.request, &req.request.model);
    let body = serde_json::to_vec(&openai_request)
        .map_err(|e| ProviderError::Translation(e.to_string()))?;

    // Chat-completions upstreams reject Anthropic-specific headers; send a
    // minimal header set instead of forwarding the client's.
    let mut builder = client
        .post(endpoint)
        .header("content-type", "application/json");
    if let Some(auth) = auth_header {
        builder = builder.header("authorization", auth);
    }

    let dispatch = Instant::now();
    let response = builder.body(body).send().await?;
    let status = response.status().as_u16();

    if !(200..300).contains(&status) {
        let first_byte_ms = dispatch.elapsed().as_millis() as u64;
        let body = response.bytes().await.unwrap_or_default();
        let envelope = ErrorEnvelope::from_upstream(status, &body);
        tracing::warn!(
            provider,
            status,
            error_type = %envelope.error.error_type,
            "Upstream error"
        );
        return Ok(ProviderResponse::error(status, &envelope, first_byte_ms));
    }

    if streaming {
        let translator = StreamTranslator::new(client_model);
        let (body, first_byte_ms) =
            spawn_streaming_body(response.bytes_stream(), Some(translator), dispatch).await;
        Ok(ProviderResponse {
            status,
            content_type: "text/event-stream",
            body,
            first_byte_ms,
        })
    } else {
        let first_byte_ms = dispatch.elapsed().as_millis() as u64;
        let bytes = response.bytes().await?;
        let completion: translation::response::OpenAiChatCompletion =
            serde_json::from_slice(&bytes).map_err(|e| {
                ProviderError::Translation(format!("unparseable upstream response: {}", e))
            })?;
        let canonical = translation::to_canonical(&completion, &client_model);
        tracing::debug!(
            provider,
            tool_calls = canonical.tool_call_count(),
            output_tokens = canonical.usage.output_tokens,
            "Translated buffered response"
        );
        let body = serde_json::to_vec(&canonical)
            .map_err(|e| ProviderError::Translation(e.to_string()))?;
        Ok(ProviderResponse {
            status,
            content_type: "application/json",
            body: ProviderBody::Buffered(Bytes::from(body)),
            first_byte_ms,
        })
    }
}
