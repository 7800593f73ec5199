//! Proxy error types and response handling

use axum::{
    body::Body,
    http::{Response, StatusCode},
    response::IntoResponse,
};

use crate::messages::ErrorEnvelope;

/// Errors that can occur on the proxy path.
///
/// Everything surfaces as a canonical error envelope so clients always see
/// `{"type":"error","error":{...}}` regardless of where the failure happened.
#[derive(Debug)]
pub(crate) enum ProxyError {
    /// Malformed client body or headers
    Validation(String),
    /// Request body could not be read
    BodyRead(String),
    /// No provider available after routing (all filtered or circuit-open)
    NoProvider,
    /// Transport failure talking to the upstream
    Upstream(String),
    ResponseBuild(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<Body> {
        let (status, error_type, message) = match self {
            ProxyError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error", msg)
            }
            ProxyError::BodyRead(msg) => (StatusCode::BAD_REQUEST, "invalid_request_error", msg),
            ProxyError::NoProvider => (
                StatusCode::SERVICE_UNAVAILABLE,
                "overloaded_error",
                "no provider available".to_string(),
            ),
            ProxyError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "api_error", msg),
            ProxyError::ResponseBuild(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "api_error", msg)
            }
        };

        tracing::error!("Proxy error: {} - {}", status, message);

        let envelope = ErrorEnvelope::new(error_type, message);
        let body = serde_json::to_vec(&envelope).unwrap_or_default();

        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap_or_else(|_| Response::new(Body::from("internal error")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_provider_maps_to_503_with_envelope() {
        let response = ProxyError::NoProvider.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let envelope: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(envelope["type"], "error");
        assert_eq!(envelope["error"]["type"], "overloaded_error");
    }

    #[tokio::test]
    async fn validation_maps_to_400() {
        let response = ProxyError::Validation("bad json".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
