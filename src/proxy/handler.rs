//! The request pipeline for `POST /v1/messages`
//!
//! 1. Parse the canonical body, assign a request id, capture start time.
//! 2. Route via subagent mapping / preference scoring; rewrite the model.
//! 3. Persist the header row (best-effort; never fails the client).
//! 4. Forward through the resilient provider registry.
//! 5. Tee the response: one copy streams to the client with SSE framing
//!    intact, one copy feeds the recorder. The recorder persists after the
//!    client stream closes, off the critical path.
//! 6. On client disconnect, drop the upstream stream (cancelling the HTTP
//!    call) and persist the partial record flagged truncated.

use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, Response},
};
use chrono::Utc;
use futures::StreamExt;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::error::ProxyError;
use super::recorder::ResponseRecorder;
use super::AppState;
use crate::config::Preference;
use crate::messages::MessagesRequest;
use crate::providers::{ForwardRequest, ProviderBody, ProviderError};
use crate::router::RouteRequest;
use crate::storage::{RequestRecord, Storage};

/// Header carrying the logical agent name for subagent routing
const AGENT_NAME_HEADER: &str = "x-agent-name";

/// Header carrying an explicit routing preference (cost/speed/quality/balanced)
const PREFERENCE_HEADER: &str = "x-route-preference";

/// Chunks buffered toward a slow client before the tee applies backpressure
const CLIENT_CHANNEL_CAPACITY: usize = 256;

pub(super) async fn messages_handler(
    State(state): State<AppState>,
    req: Request<Body>,
) -> Result<Response<Body>, ProxyError> {
    let started = Instant::now();
    let request_id = format!("req_{}", Uuid::new_v4().simple());
    let timestamp = Utc::now();

    let (parts, body) = req.into_parts();
    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ProxyError::BodyRead(e.to_string()))?;

    let canonical: MessagesRequest = serde_json::from_slice(&body_bytes)
        .map_err(|e| ProxyError::Validation(format!("invalid request body: {}", e)))?;

    let route_request = RouteRequest {
        agent_name: header_value(&parts.headers, AGENT_NAME_HEADER),
        preference: header_value(&parts.headers, PREFERENCE_HEADER)
            .and_then(|v| parse_preference(&v)),
        model: canonical.model.clone(),
    };

    let Some(route) = state.router.select(&route_request, &state.provider_names, |name| {
        state.registry.is_open(name)
    }) else {
        return Err(ProxyError::NoProvider);
    };

    tracing::debug!(
        request_id = %request_id,
        provider = %route.provider,
        model = %route.model,
        streaming = canonical.is_streaming(),
        "Forwarding request"
    );

    // Header row first; the response update completes it later
    let record = RequestRecord {
        id: request_id.clone(),
        timestamp,
        method: parts.method.to_string(),
        endpoint: parts.uri.path().to_string(),
        headers: captured_headers(&parts.headers),
        body: serde_json::from_slice(&body_bytes).unwrap_or(json!({})),
        model: route.model.clone(),
        original_model: route.original_model.clone(),
        routed_model: route.routed_model.clone(),
        provider: route.provider.clone(),
        subagent_name: route.subagent_name.clone(),
        tools_used: canonical.tool_names(),
    };
    if let Err(e) = state.storage.save_request(&record) {
        tracing::warn!(request_id = %request_id, "Failed to save request row: {}", e);
    }

    // Rewrite the model for the upstream call
    let mut upstream_request = canonical;
    upstream_request.model = route.model.clone();

    let forward = ForwardRequest {
        request: upstream_request,
        headers: sanitize_headers(&parts.headers),
        original_model: Some(route.original_model.clone()),
    };

    let response = match state.registry.forward(&route.provider, forward).await {
        Ok(response) => response,
        Err(e) => {
            // Persist the failed attempt, then surface the outcome
            persist_failure(&state.storage, &request_id, &e, started);
            return Err(match e {
                ProviderError::CircuitOpen(_) => ProxyError::NoProvider,
                other => ProxyError::Upstream(other.to_string()),
            });
        }
    };

    match response.body {
        ProviderBody::Buffered(bytes) => {
            let mut recorder = ResponseRecorder::new(
                request_id,
                response.status,
                response.content_type,
                false,
                started,
                response.first_byte_ms,
            );
            recorder.observe_buffered(&bytes);

            // Persistence stays off the client's critical path
            let storage = state.storage.clone();
            tokio::task::spawn_blocking(move || {
                let update = recorder.finalize(false);
                if let Err(e) = storage.update_request_with_response(&update) {
                    tracing::warn!("Failed to persist response record: {}", e);
                }
            });

            Response::builder()
                .status(response.status)
                .header("content-type", response.content_type)
                .body(Body::from(bytes))
                .map_err(|e| ProxyError::ResponseBuild(e.to_string()))
        }
        ProviderBody::Stream(stream) => {
            let recorder = ResponseRecorder::new(
                request_id,
                response.status,
                response.content_type,
                true,
                started,
                response.first_byte_ms,
            );
            let body_stream = tee_stream(stream, recorder, state.storage.clone());

            Response::builder()
                .status(response.status)
                .header("content-type", response.content_type)
                .header("cache-control", "no-cache")
                .body(Body::from_stream(body_stream))
                .map_err(|e| ProxyError::ResponseBuild(e.to_string()))
        }
    }
}

/// Drive the upstream stream into two sinks: the client body channel and the
/// recorder. Returns the client-side stream.
///
/// The recorder only accumulates in memory while the stream is live, so it
/// can never stall the client; the database write happens once, after the
/// stream closes (or the client disconnects).
fn tee_stream(
    mut upstream: futures::stream::BoxStream<'static, Result<bytes::Bytes, ProviderError>>,
    mut recorder: ResponseRecorder,
    storage: std::sync::Arc<Storage>,
) -> ReceiverStream<Result<bytes::Bytes, std::io::Error>> {
    let (tx, rx) = mpsc::channel::<Result<bytes::Bytes, std::io::Error>>(CLIENT_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut truncated = false;

        loop {
            // Race the next upstream chunk against client disconnect, so an
            // idle upstream cannot delay cancellation. Dropping the upstream
            // stream on exit aborts the provider call.
            let item = tokio::select! {
                item = upstream.next() => item,
                _ = tx.closed() => {
                    truncated = true;
                    break;
                }
            };
            match item {
                Some(Ok(chunk)) => {
                    recorder.observe(&chunk);
                    if tx.send(Ok(chunk)).await.is_err() {
                        truncated = true;
                        break;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!("Upstream stream error: {}", e);
                    let _ = tx
                        .send(Err(std::io::Error::other(e.to_string())))
                        .await;
                    truncated = true;
                    break;
                }
                None => break,
            }
        }
        drop(upstream);
        drop(tx);

        let update = recorder.finalize(truncated);
        let result = tokio::task::spawn_blocking(move || {
            storage.update_request_with_response(&update)
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Failed to persist response record: {}", e),
            Err(e) => tracing::warn!("Response persist task failed: {}", e),
        }
    });

    ReceiverStream::new(rx)
}

/// Persist a record for a request that never produced an upstream response
fn persist_failure(
    storage: &std::sync::Arc<Storage>,
    request_id: &str,
    error: &ProviderError,
    started: Instant,
) {
    let status = match error {
        ProviderError::CircuitOpen(_) => 503,
        _ => 502,
    };
    let mut recorder = ResponseRecorder::new(
        request_id.to_string(),
        status,
        "application/json",
        false,
        started,
        0,
    );
    let envelope = crate::messages::ErrorEnvelope::new(
        match error {
            ProviderError::CircuitOpen(_) => "overloaded_error",
            ProviderError::Timeout => "timeout_error",
            _ => "api_error",
        },
        error.to_string(),
    );
    recorder.observe_buffered(&serde_json::to_vec(&envelope).unwrap_or_default());

    let storage = storage.clone();
    tokio::task::spawn_blocking(move || {
        let update = recorder.finalize(false);
        if let Err(e) = storage.update_request_with_response(&update) {
            tracing::warn!("Failed to persist failure record: {}", e);
        }
    });
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|v| !v.is_empty())
}

fn parse_preference(value: &str) -> Option<Preference> {
    match value.to_ascii_lowercase().as_str() {
        "cost" => Some(Preference::Cost),
        "speed" => Some(Preference::Speed),
        "quality" => Some(Preference::Quality),
        "balanced" => Some(Preference::Balanced),
        other => {
            tracing::debug!("Ignoring unknown routing preference '{}'", other);
            None
        }
    }
}

/// Headers persisted on the request row. Credential values are replaced by a
/// SHA-256 fingerprint; the key itself is never stored. Oversized values are
/// clipped so one pathological header cannot bloat the row.
fn captured_headers(headers: &HeaderMap) -> serde_json::Value {
    const MAX_HEADER_VALUE: usize = 512;

    let mut captured = serde_json::Map::new();
    for (name, value) in headers.iter() {
        let name_str = name.as_str();
        let rendered = if is_credential_header(name_str) {
            let mut hasher = Sha256::new();
            hasher.update(value.as_bytes());
            format!("sha256:{:x}", hasher.finalize())[..23].to_string()
        } else {
            let raw = String::from_utf8_lossy(value.as_bytes());
            crate::util::truncate_utf8_safe(&raw, MAX_HEADER_VALUE).to_string()
        };
        captured.insert(name_str.to_string(), json!(rendered));
    }
    serde_json::Value::Object(captured)
}

fn is_credential_header(name: &str) -> bool {
    matches!(name, "x-api-key" | "authorization" | "proxy-authorization")
}

/// Headers forwarded to the adapter: hop-by-hop and credential headers are
/// stripped (adapters inject their own auth)
fn sanitize_headers(headers: &HeaderMap) -> reqwest::header::HeaderMap {
    let mut sanitized = reqwest::header::HeaderMap::new();
    for (name, value) in headers.iter() {
        let name_str = name.as_str();
        if crate::providers::is_hop_by_hop(name_str) || is_credential_header(name_str) {
            continue;
        }
        sanitized.insert(name.clone(), value.clone());
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_parsing() {
        assert_eq!(parse_preference("cost"), Some(Preference::Cost));
        assert_eq!(parse_preference("QUALITY"), Some(Preference::Quality));
        assert_eq!(parse_preference("fastest"), None);
    }

    #[test]
    fn credential_headers_fingerprinted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "sk-ant-secret".parse().unwrap());
        headers.insert("anthropic-version", "2023-06-01".parse().unwrap());

        let captured = captured_headers(&headers);
        let key = captured["x-api-key"].as_str().unwrap();
        assert!(key.starts_with("sha256:"));
        assert!(!key.contains("secret"));
        assert_eq!(captured["anthropic-version"], "2023-06-01");
    }

    #[test]
    fn sanitize_strips_credentials_and_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer sk-x".parse().unwrap());
        headers.insert("host", "localhost:8080".parse().unwrap());
        headers.insert("anthropic-beta", "tools-2024".parse().unwrap());

        let sanitized = sanitize_headers(&headers);
        assert!(sanitized.get("authorization").is_none());
        assert!(sanitized.get("host").is_none());
        assert_eq!(
            sanitized.get("anthropic-beta").unwrap().to_str().unwrap(),
            "tools-2024"
        );
    }

    #[tokio::test]
    async fn tee_persists_after_client_stream_closes() {
        use crate::storage::test_support::open_temp;
        use crate::storage::RequestRecord;
        use futures::StreamExt as _;

        let (_dir, storage) = open_temp();
        let storage = std::sync::Arc::new(storage);
        storage
            .save_request(&RequestRecord {
                id: "req_tee".to_string(),
                timestamp: Utc::now(),
                method: "POST".to_string(),
                endpoint: "/v1/messages".to_string(),
                headers: json!({}),
                body: json!({}),
                model: "m".to_string(),
                original_model: "m".to_string(),
                routed_model: None,
                provider: "anthropic".to_string(),
                subagent_name: None,
                tools_used: vec![],
            })
            .unwrap();

        let sse = concat!(
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"model\":\"m\",\"usage\":{\"input_tokens\":2}}}\n",
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"text\":\"hello\"}}\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":1}}\n",
        );
        let upstream = futures::stream::iter(vec![Ok(bytes::Bytes::from(sse))]).boxed();
        let recorder = ResponseRecorder::new(
            "req_tee".to_string(),
            200,
            "text/event-stream",
            true,
            Instant::now(),
            5,
        );

        let mut client = tee_stream(upstream, recorder, storage.clone());
        let mut received = Vec::new();
        while let Some(chunk) = client.next().await {
            received.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(received, sse.as_bytes(), "client copy is byte-identical");

        // Recorder persists shortly after the stream closes
        for _ in 0..50 {
            let row = storage.get_request_by_id("req_tee").unwrap().unwrap();
            if row.status.is_some() {
                assert_eq!(row.input_tokens, 2);
                assert_eq!(row.output_tokens, 1);
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("response record never persisted");
    }

    #[tokio::test]
    async fn tee_marks_truncation_on_client_disconnect() {
        use crate::storage::test_support::open_temp;
        use crate::storage::RequestRecord;

        let (_dir, storage) = open_temp();
        let storage = std::sync::Arc::new(storage);
        storage
            .save_request(&RequestRecord {
                id: "req_drop".to_string(),
                timestamp: Utc::now(),
                method: "POST".to_string(),
                endpoint: "/v1/messages".to_string(),
                headers: json!({}),
                body: json!({}),
                model: "m".to_string(),
                original_model: "m".to_string(),
                routed_model: None,
                provider: "anthropic".to_string(),
                subagent_name: None,
                tools_used: vec![],
            })
            .unwrap();

        // One chunk, then the upstream stalls forever (a thinking pause, a
        // hung connection). Only the disconnect race can end the stream.
        let upstream = futures::stream::unfold(0u64, |n| async move {
            if n == 0 {
                let chunk = bytes::Bytes::from(
                    "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"text\":\"x\"}}\n",
                );
                Some((Ok::<_, ProviderError>(chunk), 1))
            } else {
                futures::future::pending::<()>().await;
                unreachable!()
            }
        })
        .boxed();
        let recorder = ResponseRecorder::new(
            "req_drop".to_string(),
            200,
            "text/event-stream",
            true,
            Instant::now(),
            5,
        );

        let mut client = tee_stream(upstream, recorder, storage.clone());
        // Consume the first chunk, then disconnect while the upstream idles
        let first = client.next().await;
        assert!(first.is_some());
        drop(client);

        for _ in 0..100 {
            let row = storage.get_request_by_id("req_drop").unwrap().unwrap();
            if row.status.is_some() {
                let conn = storage.conn().unwrap();
                let body: String = conn
                    .query_row(
                        "SELECT response_json FROM requests WHERE id = 'req_drop'",
                        [],
                        |r| r.get(0),
                    )
                    .unwrap();
                let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
                assert_eq!(parsed["truncated"], true);
                assert_eq!(parsed["is_streaming"], true);
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("truncated record never persisted");
    }
}
