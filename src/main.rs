// relaymon - Monitoring reverse proxy for LLM APIs
//
// Sits between a developer tool and one or more upstream LLM providers,
// forwarding each request to a routed backend, observing the streamed or
// buffered response, persisting a structured record of the exchange, and
// exposing analytics and full-text conversation search over the captured
// history.
//
// Architecture:
// - Proxy server (axum): accepts /v1/messages, routes and forwards
// - Provider adapters (reqwest): per-backend clients with format translation
// - Router + resilience: preference scoring, circuit breaking, failover
// - Storage (rusqlite/WAL): request log, conversation index, FTS
// - Indexer (notify/walkdir): keeps the conversation tables in sync with
//   the session JSONL tree

mod cli;
mod config;
mod indexer;
mod messages;
mod providers;
mod proxy;
mod resilience;
mod router;
mod startup;
mod storage;
mod translation;
mod util;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use config::Config;
use storage::Storage;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // Handle CLI commands first (config --show, --path)
    if cli::handle_cli(&cli) {
        return Ok(());
    }

    // Fatal config errors exit nonzero before anything serves
    let config = Config::load(cli.config.as_ref())?;

    // Precedence: RUST_LOG env var > config file > default "info"
    let default_filter = format!(
        "relaymon={},tower_http=debug,axum=debug",
        config.logging.level
    );
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    startup::print_startup(&config);
    startup::log_startup(&config);

    // Storage is fatal at startup; everything else degrades gracefully
    let storage = Arc::new(
        Storage::open(&config.storage.db_path).context("opening database")?,
    );

    let client = providers::build_http_client()?;
    let registry = Arc::new(resilience::ProviderRegistry::from_config(
        &config.providers,
        client,
    ));

    let indexer = indexer::start(&config.indexer, storage.clone());

    let state = proxy::AppState::new(&config, storage, registry, indexer.clone());

    // Graceful shutdown: ctrl-c signals the server, then the indexer drains
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let port = config.server.port;
    let server = tokio::spawn(async move {
        if let Err(e) = proxy::serve(port, state, shutdown_rx).await {
            tracing::error!("Server failed: {:?}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutting down...");

    let _ = shutdown_tx.send(());
    let _ = server.await;

    indexer.shutdown();
    tracing::info!("Shutdown complete");
    Ok(())
}
