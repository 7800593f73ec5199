//! Health endpoint

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;

use super::ApiError;
use crate::proxy::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub database: &'static str,
    pub indexer: &'static str,
    pub timestamp: String,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    // A trivial query doubles as the database liveness probe
    let database = match state.storage.ping() {
        Ok(()) => "ok",
        Err(_) => "error",
    };
    let status = if database == "ok" { "ok" } else { "degraded" };
    Ok(Json(HealthResponse {
        status,
        service: "relaymon",
        database,
        indexer: state.indexer.status(),
        timestamp: Utc::now().to_rfc3339(),
    }))
}
