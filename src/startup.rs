// Startup module - banner and configuration summary
//
// Prints a short banner before the server takes over, then logs the
// effective configuration through tracing so headless runs capture it too.

use crate::config::{Config, VERSION};

/// ANSI color codes for terminal output
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GREEN: &str = "\x1b[32m";
}

/// Print the startup banner
pub fn print_startup(config: &Config) {
    use colors::*;

    println!();
    println!("  {BOLD}{CYAN}relaymon{RESET} {DIM}v{VERSION}{RESET}");
    println!("  {DIM}Monitoring reverse proxy for LLM APIs{RESET}");
    println!();

    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("  {DIM}Config:{RESET} {GREEN}ok{RESET} {}", path.display());
        } else {
            println!("  {DIM}Config:{RESET} {DIM}(using defaults){RESET}");
        }
    }

    println!(
        "  {DIM}Proxy:{RESET}  http://127.0.0.1:{}/v1/messages",
        config.server.port
    );
    println!(
        "  {DIM}API:{RESET}    http://127.0.0.1:{}/api/v2/",
        config.server.port
    );
    println!();
}

/// Log the effective configuration
pub fn log_startup(config: &Config) {
    tracing::info!("relaymon v{} starting", VERSION);
    tracing::info!("Database: {}", config.storage.db_path.display());

    let mut providers: Vec<String> = config
        .providers
        .iter()
        .map(|(name, p)| format!("{} ({}, {})", name, p.format, p.base_url))
        .collect();
    providers.sort();
    tracing::info!("Providers: {}", providers.join(", "));

    for (name, provider) in &config.providers {
        if let Some(fallback) = &provider.fallback_provider {
            tracing::info!("Failover: {} -> {}", name, fallback);
        }
        if provider.max_retries > 0 {
            tracing::debug!("Provider {}: {} transport retries", name, provider.max_retries);
        }
    }

    if config.subagents.enable {
        tracing::info!(
            "Subagent routing enabled ({} mapping(s))",
            config.subagents.mappings.len()
        );
        for (agent, target) in &config.subagents.mappings {
            tracing::debug!("  subagent '{}' -> {}", agent, target);
        }
    }

    if config.indexer.enabled {
        tracing::info!(
            "Conversation indexer watching {} (debounce {}s)",
            config.indexer.watch_root.display(),
            config.indexer.debounce_secs
        );
    } else {
        tracing::info!("Conversation indexer disabled");
    }
}
