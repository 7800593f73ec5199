//! Read-only analytics API over the store
//!
//! All endpoints return JSON with snake_case fields (a contract with the
//! dashboard collaborator). Time-window endpoints accept `start`/`end` as
//! RFC 3339 strings and default to the last 30 days when both are omitted.

mod conversations;
mod health;
mod requests;
mod search;
mod stats;

pub use conversations::{
    get_conversation, get_conversation_messages, list_conversations, list_plans, list_todos,
    reindex_conversations,
};
pub use health::health;
pub use requests::{delete_requests, get_request, list_requests};
pub use search::search_conversations;
pub use stats::{
    stats_hourly, stats_model, stats_overview, stats_performance, stats_provider, stats_subagent,
    stats_tool, stats_weekly,
};

use axum::{http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::storage::TimeWindow;

/// API error responses, converted to HTTP status codes via IntoResponse
#[derive(Debug)]
pub enum ApiError {
    Internal(String),
    BadRequest(String),
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        tracing::error!("API error: {} - {}", status, message);

        (status, message).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

/// Shared `start`/`end` query parameters
#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl WindowQuery {
    /// Resolve to a concrete window; invalid RFC 3339 input is a 400
    pub fn resolve(&self) -> Result<TimeWindow, ApiError> {
        let parse = |value: &Option<String>, name: &str| -> Result<Option<DateTime<Utc>>, ApiError> {
            match value {
                None => Ok(None),
                Some(raw) => DateTime::parse_from_rfc3339(raw)
                    .map(|dt| Some(dt.with_timezone(&Utc)))
                    .map_err(|e| {
                        ApiError::BadRequest(format!("invalid {} timestamp '{}': {}", name, raw, e))
                    }),
            }
        };
        Ok(TimeWindow::resolve(
            parse(&self.start, "start")?,
            parse(&self.end, "end")?,
        ))
    }
}
