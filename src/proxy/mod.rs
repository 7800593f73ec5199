//! Proxy server - HTTP surface and the request pipeline
//!
//! One axum server carries both surfaces: the streaming proxy path
//! (`POST /v1/messages`) and the read-only analytics API (`/api/...`,
//! `/health`). Binds localhost only; this is a single-user local tool.

pub mod api;
mod error;
mod handler;
mod recorder;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{delete, get, post};
use axum::Router as AxumRouter;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::indexer::IndexerHandle;
use crate::resilience::ProviderRegistry;
use crate::router::Router;
use crate::storage::Storage;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub registry: Arc<ProviderRegistry>,
    pub router: Arc<Router>,
    pub indexer: IndexerHandle,
    /// Sorted provider names, the router's default candidate list
    pub provider_names: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(
        config: &Config,
        storage: Arc<Storage>,
        registry: Arc<ProviderRegistry>,
        indexer: IndexerHandle,
    ) -> Self {
        let mut provider_names: Vec<String> = config.providers.keys().cloned().collect();
        provider_names.sort();
        Self {
            storage,
            registry,
            router: Arc::new(Router::new(
                config.subagents.clone(),
                config.routing.clone(),
            )),
            indexer,
            provider_names: Arc::new(provider_names),
        }
    }
}

/// Build the full route table
pub fn build_router(state: AppState) -> AxumRouter {
    AxumRouter::new()
        // Proxy path
        .route("/v1/messages", post(handler::messages_handler))
        // Request log and aggregates
        .route("/api/v2/requests", get(api::list_requests))
        .route("/api/v2/requests/:id", get(api::get_request))
        .route("/api/requests", delete(api::delete_requests))
        .route("/api/v2/stats", get(api::stats_overview))
        .route("/api/v2/stats/hourly", get(api::stats_hourly))
        .route("/api/v2/stats/weekly", get(api::stats_weekly))
        .route("/api/v2/stats/model", get(api::stats_model))
        .route("/api/v2/stats/provider", get(api::stats_provider))
        .route("/api/v2/stats/subagent", get(api::stats_subagent))
        .route("/api/v2/stats/tool", get(api::stats_tool))
        .route("/api/v2/stats/performance", get(api::stats_performance))
        // Conversation index
        .route("/api/v2/conversations", get(api::list_conversations))
        .route("/api/v2/conversations/reindex", post(api::reindex_conversations))
        .route("/api/v2/conversations/:id", get(api::get_conversation))
        .route(
            "/api/v2/conversations/:id/messages",
            get(api::get_conversation_messages),
        )
        .route("/api/conversations/search", get(api::search_conversations))
        // Session-data listings
        .route("/api/v2/todos", get(api::list_todos))
        .route("/api/v2/plans", get(api::list_plans))
        // Health
        .route("/health", get(api::health))
        .with_state(state)
}

/// Start serving. Runs until the shutdown signal fires.
pub async fn serve(
    port: u16,
    state: AppState,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let bind_addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let app = build_router(state);

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;
    tracing::info!("Proxy listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.await.ok();
        })
        .await
        .context("server error")?;

    tracing::info!("Proxy server shut down gracefully");
    Ok(())
}
