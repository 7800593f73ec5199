//! Provider adapters - per-backend HTTP clients behind a uniform contract
//!
//! Every adapter accepts the canonical Messages request and produces a
//! canonical response; whatever wire format the upstream actually speaks is
//! the adapter's private concern. Streaming responses are handed to the
//! pipeline chunk by chunk, never buffered.
//!
//! Three variants ship:
//! - [`anthropic::AnthropicAdapter`]: the canonical shape matches upstream;
//!   bytes pass through untouched.
//! - [`openai::OpenAiAdapter`]: bidirectional chat-completions translation,
//!   `Authorization: Bearer` auth.
//! - [`plano::PlanoAdapter`]: chat-completions translation behind an
//!   aggregator that authenticates upstream itself.

pub mod anthropic;
pub mod openai;
pub mod plano;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::ProviderConfig;
use crate::messages::{ErrorEnvelope, MessagesRequest};
use crate::translation::StreamTranslator;

/// Upstream call timeout. Long-running generations stream for minutes.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// Buffered chunks in flight between the upstream reader and the pipeline
const STREAM_CHANNEL_CAPACITY: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Failures an adapter can produce.
///
/// Upstream non-2xx responses are NOT errors at this layer: they come back as
/// a [`ProviderResponse`] carrying the upstream status and a canonical error
/// body. Only transport-level problems surface here.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("upstream request failed: {0}")]
    Network(String),

    #[error("upstream request timed out")]
    Timeout,

    #[error("circuit open for provider '{0}'")]
    CircuitOpen(String),

    #[error("request translation failed: {0}")]
    Translation(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request / response types
// ─────────────────────────────────────────────────────────────────────────────

/// A canonical request on its way to an upstream
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    /// Canonical body; `model` is already the routed model
    pub request: MessagesRequest,
    /// Client headers, pre-sanitized by the pipeline (hop-by-hop and auth
    /// headers already stripped)
    pub headers: HeaderMap,
    /// Model the client originally asked for; translated responses report
    /// this instead of the routed model
    pub original_model: Option<String>,
}

/// Response body: complete, or a stream of canonical SSE bytes
pub enum ProviderBody {
    Buffered(Bytes),
    Stream(BoxStream<'static, Result<Bytes, ProviderError>>),
}

impl std::fmt::Debug for ProviderBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderBody::Buffered(bytes) => f.debug_tuple("Buffered").field(bytes).finish(),
            ProviderBody::Stream(_) => f.debug_tuple("Stream").field(&"..").finish(),
        }
    }
}

/// What an adapter hands back to the pipeline
#[derive(Debug)]
pub struct ProviderResponse {
    pub status: u16,
    /// Content type for the client response
    pub content_type: &'static str,
    pub body: ProviderBody,
    /// Milliseconds from request dispatch to the first upstream body byte
    pub first_byte_ms: u64,
}

impl ProviderResponse {
    /// Build an error response carrying the canonical error envelope
    pub fn error(status: u16, envelope: &ErrorEnvelope, first_byte_ms: u64) -> Self {
        let body = serde_json::to_vec(envelope).unwrap_or_else(|_| {
            br#"{"type":"error","error":{"type":"api_error","message":"error"}}"#.to_vec()
        });
        Self {
            status,
            content_type: "application/json",
            body: ProviderBody::Buffered(Bytes::from(body)),
            first_byte_ms,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Adapter trait
// ─────────────────────────────────────────────────────────────────────────────

/// Uniform forwarding contract implemented by every backend adapter
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider name as configured (used in logs and request records)
    fn name(&self) -> &str;

    /// Forward a canonical request and return a canonical response.
    ///
    /// In streaming mode the returned body must yield chunks as they arrive
    /// from upstream; buffering the full response is a contract violation.
    async fn forward(&self, req: ForwardRequest) -> Result<ProviderResponse, ProviderError>;
}

/// Build the adapter for a provider config entry
pub fn build_adapter(
    name: &str,
    config: &ProviderConfig,
    client: reqwest::Client,
) -> Arc<dyn ProviderAdapter> {
    use crate::config::ApiFormat;
    match config.format {
        ApiFormat::Anthropic => Arc::new(anthropic::AnthropicAdapter::new(name, config, client)),
        ApiFormat::Openai => Arc::new(openai::OpenAiAdapter::new(name, config, client)),
        ApiFormat::Plano => Arc::new(plano::PlanoAdapter::new(name, config, client)),
    }
}

/// Shared HTTP client for all adapters.
///
/// HTTP/1.1 only: some chat-completions backends reset HTTP/2 streams
/// mid-response.
pub fn build_http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(UPSTREAM_TIMEOUT)
        .pool_max_idle_per_host(10)
        .http1_only()
        .build()
        .map_err(|e| anyhow::anyhow!("failed to create HTTP client: {}", e))
}

// ─────────────────────────────────────────────────────────────────────────────
// Key rotation
// ─────────────────────────────────────────────────────────────────────────────

/// Round-robin rotation over a provider's configured API keys
pub(crate) struct KeyRing {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl KeyRing {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn next(&self) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        Some(&self.keys[idx])
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared forwarding plumbing
// ─────────────────────────────────────────────────────────────────────────────

/// Headers that must not be forwarded upstream
pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name,
        "host"
            | "connection"
            | "transfer-encoding"
            | "content-length"
            | "keep-alive"
            | "upgrade"
            | "proxy-authorization"
            | "te"
            | "trailer"
    )
}

/// Copy forwardable client headers onto an outgoing request
pub(crate) fn copy_headers(
    mut builder: reqwest::RequestBuilder,
    headers: &HeaderMap,
) -> reqwest::RequestBuilder {
    for (key, value) in headers.iter() {
        if is_hop_by_hop(key.as_str()) {
            continue;
        }
        builder = builder.header(key, value);
    }
    builder
}

/// Await the first upstream body chunk, then hand the rest of the stream to a
/// background task feeding a bounded channel.
///
/// Waiting for the first chunk here gives an exact first-byte measurement and
/// still returns to the pipeline before the bulk of the response arrives.
/// When `translator` is set, every chunk passes through the SSE state machine
/// and the translated bytes are flushed per event; otherwise bytes pass
/// through verbatim.
pub(crate) async fn spawn_streaming_body<S>(
    upstream: S,
    mut translator: Option<StreamTranslator>,
    dispatch: Instant,
) -> (ProviderBody, u64)
where
    S: futures::Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let mut upstream = Box::pin(upstream);
    let first = upstream.next().await;
    let first_byte_ms = dispatch.elapsed().as_millis() as u64;

    let (tx, rx) = mpsc::channel::<Result<Bytes, ProviderError>>(STREAM_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut pending = first;
        loop {
            let next = match pending.take() {
                Some(item) => Some(item),
                // Race the receiver going away against the next chunk, so a
                // cancelled request aborts the upstream call even while the
                // upstream is idle
                None => tokio::select! {
                    item = upstream.next() => item,
                    _ = tx.closed() => return,
                },
            };
            let Some(item) = next else { break };

            match item {
                Ok(chunk) => {
                    let out = match translator.as_mut() {
                        Some(t) => match t.push_chunk(&chunk) {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                tracing::warn!("SSE translation error: {}", e);
                                let _ = tx
                                    .send(Err(ProviderError::Translation(e.to_string())))
                                    .await;
                                return;
                            }
                        },
                        None => chunk.to_vec(),
                    };
                    if !out.is_empty() && tx.send(Ok(Bytes::from(out))).await.is_err() {
                        // Client went away; dropping the upstream stream
                        // aborts the connection
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(ProviderError::from(e))).await;
                    return;
                }
            }
        }

        // Upstream closed; let the translator emit any closing events
        if let Some(t) = translator.as_mut() {
            match t.finish() {
                Ok(tail) if !tail.is_empty() => {
                    let _ = tx.send(Ok(Bytes::from(tail))).await;
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = tx
                        .send(Err(ProviderError::Translation(e.to_string())))
                        .await;
                }
            }
        }
    });

    (
        ProviderBody::Stream(ReceiverStream::new(rx).boxed()),
        first_byte_ms,
    )
}
