//! Conversation full-text search endpoint

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::proxy::AppState;
use crate::storage::SearchResult;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    /// Search terms (whitespace separated, OR semantics)
    #[serde(default)]
    pub q: String,
    /// Optional project path equality filter
    pub project: Option<String>,
    #[serde(default = "default_search_limit")]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
}

fn default_search_limit() -> u64 {
    20
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

/// GET /api/conversations/search?q=&project=&limit=&offset=
///
/// An empty query (and a build without FTS) returns an empty result set,
/// never an error.
pub async fn search_conversations(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, ApiError> {
    let limit = query.limit.min(200);
    let (results, total) = state.storage.search_conversations(
        &query.q,
        query.project.as_deref(),
        query.offset,
        limit,
    )?;
    Ok(Json(SearchResponse {
        query: query.q,
        results,
        total,
        limit,
        offset: query.offset,
    }))
}
