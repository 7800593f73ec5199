//! Conversation index endpoints: listing, drill-down, re-index, session data

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::proxy::AppState;
use crate::storage::{ConversationSummary, MessageRow, PlanFileRow, TodoFileRow};

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_list_limit")]
    pub limit: u64,
}

fn default_list_limit() -> u64 {
    50
}

/// GET /api/v2/conversations - indexed conversations, most recent first
pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    Ok(Json(
        state
            .storage
            .get_indexed_conversations(query.limit.min(1000))?,
    ))
}

#[derive(Debug, Serialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: ConversationSummary,
    pub messages: Vec<MessageRow>,
}

/// GET /api/v2/conversations/:id - conversation with its messages
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationDetail>, ApiError> {
    let Some(conversation) = state.storage.get_conversation(&id)? else {
        return Err(ApiError::NotFound(format!("no conversation '{}'", id)));
    };
    let messages = state
        .storage
        .get_conversation_messages(&id, 1000, 0, false)?;
    Ok(Json(ConversationDetail {
        conversation,
        messages,
    }))
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(default = "default_messages_limit")]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub include_subagents: bool,
}

fn default_messages_limit() -> u64 {
    100
}

/// GET /api/v2/conversations/:id/messages - paginated messages
pub async fn get_conversation_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<MessageRow>>, ApiError> {
    // Cheap existence check before paging messages
    if state.storage.get_conversation_file_path(&id)?.is_none() {
        return Err(ApiError::NotFound(format!("no conversation '{}'", id)));
    }
    Ok(Json(state.storage.get_conversation_messages(
        &id,
        query.limit.min(1000),
        query.offset,
        query.include_subagents,
    )?))
}

#[derive(Debug, Serialize)]
pub struct ReindexResponse {
    pub cleared: u64,
    pub rescan_queued: bool,
}

/// POST /api/v2/conversations/reindex - clear `indexed_at` everywhere and
/// queue a rescan
pub async fn reindex_conversations(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<ReindexResponse>), ApiError> {
    let cleared = state.storage.mark_all_unindexed()?;
    let rescan_queued = state.indexer.trigger_rescan();
    tracing::info!(cleared, rescan_queued, "Conversation re-index requested");
    Ok((
        StatusCode::OK,
        Json(ReindexResponse {
            cleared,
            rescan_queued,
        }),
    ))
}

/// GET /api/v2/todos - indexed todo files
pub async fn list_todos(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<TodoFileRow>>, ApiError> {
    Ok(Json(state.storage.list_todo_files(query.limit.min(1000))?))
}

/// GET /api/v2/plans - indexed plan files
pub async fn list_plans(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<PlanFileRow>>, ApiError> {
    Ok(Json(state.storage.list_plan_files(query.limit.min(1000))?))
}
