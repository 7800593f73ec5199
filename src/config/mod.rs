//! Configuration for the proxy and analytics server
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/relaymon/config.toml, or --config override)
//! 3. Built-in defaults (lowest priority)

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

mod providers;
mod routing;

pub use providers::{ApiFormat, CircuitBreakerConfig, ProviderConfig};
pub use routing::{Preference, ProviderProfile, RoutingConfig, TaskRouting};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub indexer: IndexerConfig,
    /// Provider backends by name
    pub providers: HashMap<String, ProviderConfig>,
    pub subagents: SubagentsConfig,
    pub routing: RoutingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen port for the proxy (binds 127.0.0.1)
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// SQLite database file location
    pub db_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Whether the conversation indexer runs at all
    pub enabled: bool,
    /// Root of the per-session JSONL tree (one subdirectory per project)
    pub watch_root: PathBuf,
    /// Optional directory of per-session todo JSON files (scan-only)
    pub todos_dir: Option<PathBuf>,
    /// Optional directory of plan markdown files (scan-only)
    pub plans_dir: Option<PathBuf>,
    /// Seconds to coalesce rapid writes to one file before re-indexing
    pub debounce_secs: u64,
}

/// Subagent routing: a named logical actor is pinned to `provider:model`
/// regardless of the model the client asked for.
#[derive(Debug, Clone, Default)]
pub struct SubagentsConfig {
    pub enable: bool,
    /// agent name -> "provider:model"
    pub mappings: HashMap<String, String>,
}

impl SubagentsConfig {
    /// Resolve an agent name to its (provider, model) pair, if mapped
    pub fn resolve(&self, agent: &str) -> Option<(String, String)> {
        if !self.enable {
            return None;
        }
        let target = self.mappings.get(agent)?;
        let (provider, model) = target.split_once(':')?;
        if provider.is_empty() || model.is_empty() {
            return None;
        }
        Some((provider.to_string(), model.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level when RUST_LOG is not set: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert("anthropic".to_string(), ProviderConfig::default());
        Self {
            server: ServerConfig { port: 8080 },
            storage: StorageConfig {
                db_path: PathBuf::from("./data/relaymon.db"),
            },
            indexer: IndexerConfig {
                enabled: true,
                watch_root: default_watch_root(),
                todos_dir: None,
                plans_dir: None,
                debounce_secs: 5,
            },
            providers,
            subagents: SubagentsConfig::default(),
            routing: RoutingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_watch_root() -> PathBuf {
    dirs::home_dir()
        .map(|p| p.join(".claude").join("projects"))
        .unwrap_or_else(|| PathBuf::from("./projects"))
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure (subset of Config that makes sense to persist)
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub server: Option<FileServer>,
    pub storage: Option<FileStorage>,
    pub indexer: Option<FileIndexer>,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    pub subagents: Option<FileSubagents>,
    pub routing: Option<routing::FileRouting>,
    pub logging: Option<FileLogging>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileServer {
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileStorage {
    pub db_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileIndexer {
    pub enabled: Option<bool>,
    pub watch_root: Option<String>,
    pub todos_dir: Option<String>,
    pub plans_dir: Option<String>,
    pub debounce_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileSubagents {
    pub enable: Option<bool>,
    #[serde(default)]
    pub mappings: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileLogging {
    pub level: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Get the default config file path: ~/.config/relaymon/config.toml
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("relaymon").join("config.toml"))
    }

    /// Load file config from an explicit path or the default location.
    ///
    /// A config file that exists but cannot be parsed is a fatal error:
    /// failing fast with a clear message beats silently running on defaults
    /// while the user debugs the wrong thing.
    fn load_file_config(path_override: Option<&PathBuf>) -> anyhow::Result<FileConfig> {
        let path = match path_override {
            Some(p) => p.clone(),
            None => match Self::config_path() {
                Some(p) => p,
                None => return Ok(FileConfig::default()),
            },
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).map_err(|e| {
                anyhow::anyhow!("failed to parse config file {}: {}", path.display(), e)
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if path_override.is_some() {
                    anyhow::bail!("config file not found: {}", path.display());
                }
                Ok(FileConfig::default())
            }
            Err(e) => anyhow::bail!("cannot read config file {}: {}", path.display(), e),
        }
    }

    /// Load configuration: env vars > file > defaults
    pub fn load(path_override: Option<&PathBuf>) -> anyhow::Result<Self> {
        let file = Self::load_file_config(path_override)?;
        let defaults = Config::default();

        // Port: env > file > default
        let port = std::env::var("RELAYMON_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file.server.and_then(|s| s.port))
            .unwrap_or(defaults.server.port);

        // DB path: env > file > default
        let db_path = std::env::var("RELAYMON_DB_PATH")
            .ok()
            .map(PathBuf::from)
            .or(file
                .storage
                .and_then(|s| s.db_path)
                .map(PathBuf::from))
            .unwrap_or(defaults.storage.db_path);

        let indexer = {
            let f = file.indexer.unwrap_or_default();
            IndexerConfig {
                enabled: f.enabled.unwrap_or(defaults.indexer.enabled),
                watch_root: std::env::var("RELAYMON_WATCH_ROOT")
                    .ok()
                    .map(PathBuf::from)
                    .or(f.watch_root.map(PathBuf::from))
                    .unwrap_or(defaults.indexer.watch_root),
                todos_dir: f.todos_dir.map(PathBuf::from),
                plans_dir: f.plans_dir.map(PathBuf::from),
                debounce_secs: f.debounce_secs.unwrap_or(defaults.indexer.debounce_secs),
            }
        };

        // Providers: file table, falling back to a default anthropic entry.
        // ANTHROPIC_API_KEY fills the anthropic provider's key when the file
        // didn't configure one.
        let mut providers = if file.providers.is_empty() {
            defaults.providers
        } else {
            file.providers
        };
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.is_empty() {
                if let Some(anthropic) = providers.get_mut("anthropic") {
                    if anthropic.api_key.is_none() && anthropic.api_keys.is_empty() {
                        anthropic.api_key = Some(key);
                    }
                }
            }
        }

        // Subagents: file plus RELAYMON_SUBAGENTS="name=provider:model,..."
        let mut subagents = {
            let f = file.subagents.unwrap_or_default();
            SubagentsConfig {
                enable: f.enable.unwrap_or(false),
                mappings: f.mappings,
            }
        };
        if let Ok(raw) = std::env::var("RELAYMON_SUBAGENTS") {
            for entry in raw.split(',').filter(|s| !s.trim().is_empty()) {
                if let Some((name, target)) = entry.split_once('=') {
                    subagents
                        .mappings
                        .insert(name.trim().to_string(), target.trim().to_string());
                    subagents.enable = true;
                } else {
                    tracing::warn!("Ignoring malformed RELAYMON_SUBAGENTS entry: {}", entry);
                }
            }
        }

        let routing = RoutingConfig::from_file(file.routing);

        let logging = LoggingConfig {
            level: file
                .logging
                .and_then(|l| l.level)
                .unwrap_or(defaults.logging.level),
        };

        let config = Self {
            server: ServerConfig { port },
            storage: StorageConfig { db_path },
            indexer,
            providers,
            subagents,
            routing,
            logging,
        };
        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation: every referenced provider must exist
    fn validate(&self) -> anyhow::Result<()> {
        for (name, provider) in &self.providers {
            if let Some(fallback) = &provider.fallback_provider {
                if !self.providers.contains_key(fallback) {
                    anyhow::bail!(
                        "provider '{}' names unknown fallback_provider '{}'",
                        name,
                        fallback
                    );
                }
                if fallback == name {
                    anyhow::bail!("provider '{}' cannot be its own fallback", name);
                }
            }
        }
        for (task, routing) in &self.routing.tasks {
            for candidate in &routing.providers {
                if !self.providers.contains_key(candidate) {
                    anyhow::bail!(
                        "routing task '{}' names unknown provider '{}'",
                        task,
                        candidate
                    );
                }
            }
        }
        for (agent, target) in &self.subagents.mappings {
            match target.split_once(':') {
                Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                    if !self.providers.contains_key(provider) {
                        anyhow::bail!(
                            "subagent '{}' maps to unknown provider '{}'",
                            agent,
                            provider
                        );
                    }
                }
                _ => anyhow::bail!(
                    "subagent '{}' mapping '{}' is not of the form provider:model",
                    agent,
                    target
                ),
            }
        }
        Ok(())
    }
}
