//! Aggregate statistics endpoints
//!
//! Thin wrappers over the store's aggregation queries; every endpoint takes
//! the shared start/end window.

use axum::{
    extract::{Query, State},
    Json,
};

use super::{ApiError, WindowQuery};
use crate::proxy::AppState;
use crate::storage::{
    DailyBucket, HourlyBucket, ModelStats, OverviewStats, PerformanceStats, ProviderStats,
    SubagentStats, ToolStats,
};

/// GET /api/v2/stats
pub async fn stats_overview(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<OverviewStats>, ApiError> {
    Ok(Json(state.storage.get_stats(query.resolve()?)?))
}

/// GET /api/v2/stats/hourly
pub async fn stats_hourly(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<Vec<HourlyBucket>>, ApiError> {
    Ok(Json(state.storage.get_hourly_stats(query.resolve()?)?))
}

/// GET /api/v2/stats/weekly - daily buckets over the window
pub async fn stats_weekly(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<Vec<DailyBucket>>, ApiError> {
    Ok(Json(state.storage.get_daily_stats(query.resolve()?)?))
}

/// GET /api/v2/stats/model
pub async fn stats_model(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<Vec<ModelStats>>, ApiError> {
    Ok(Json(state.storage.get_model_stats(query.resolve()?)?))
}

/// GET /api/v2/stats/provider
pub async fn stats_provider(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<Vec<ProviderStats>>, ApiError> {
    Ok(Json(state.storage.get_provider_stats(query.resolve()?)?))
}

/// GET /api/v2/stats/subagent
pub async fn stats_subagent(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<Vec<SubagentStats>>, ApiError> {
    Ok(Json(state.storage.get_subagent_stats(query.resolve()?)?))
}

/// GET /api/v2/stats/tool
pub async fn stats_tool(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<Vec<ToolStats>>, ApiError> {
    Ok(Json(state.storage.get_tool_stats(query.resolve()?)?))
}

/// GET /api/v2/stats/performance - p50/p95/p99 latencies
pub async fn stats_performance(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<PerformanceStats>, ApiError> {
    Ok(Json(state.storage.get_performance_stats(query.resolve()?)?))
}
