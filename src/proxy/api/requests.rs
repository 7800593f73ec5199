//! Request log endpoints

use axum::{
    extract::{Path, Query, State},
    http::{header::HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{ApiError, WindowQuery};
use crate::proxy::AppState;

#[derive(Debug, Deserialize)]
pub struct RequestsQuery {
    pub model: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_limit() -> u64 {
    50
}

/// GET /api/v2/requests - paginated request summaries, newest first.
/// Pagination metadata travels in X-Total-Count / X-Offset / X-Limit headers.
pub async fn list_requests(
    State(state): State<AppState>,
    Query(query): Query<RequestsQuery>,
) -> Result<Response, ApiError> {
    let window = WindowQuery {
        start: query.start.clone(),
        end: query.end.clone(),
    }
    .resolve()?;
    let limit = query.limit.min(1000);
    let (rows, total) = state.storage.get_requests_summary_paginated(
        query.model.as_deref(),
        window,
        query.offset,
        limit,
    )?;

    let mut response = Json(rows).into_response();
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("x-total-count"),
        header_number(total),
    );
    headers.insert(HeaderName::from_static("x-offset"), header_number(query.offset));
    headers.insert(HeaderName::from_static("x-limit"), header_number(limit));
    Ok(response)
}

fn header_number(value: u64) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or(HeaderValue::from_static("0"))
}

/// GET /api/v2/requests/:id - one summary or 404
pub async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.storage.get_request_by_id(&id)? {
        Some(summary) => Ok(Json(summary).into_response()),
        None => Err(ApiError::NotFound(format!("no request with id '{}'", id))),
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: u64,
}

/// DELETE /api/requests - clear the request log
pub async fn delete_requests(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<DeleteResponse>), ApiError> {
    let deleted = state.storage.clear_requests()?;
    tracing::info!(deleted, "Cleared request log");
    Ok((StatusCode::OK, Json(DeleteResponse { deleted })))
}
