//! Provider backend configuration
//!
//! Each `[providers.<name>]` section describes one upstream backend: where it
//! lives, which wire format it speaks, how to authenticate, and how its
//! circuit breaker behaves.

use serde::Deserialize;

// ─────────────────────────────────────────────────────────────────────────────
// API Format
// ─────────────────────────────────────────────────────────────────────────────

/// Wire format expected by a provider backend
///
/// - Anthropic: `/v1/messages` with the Anthropic request/response schema
/// - Openai: `/v1/chat/completions` with the chat-completions schema
/// - Plano: chat-completions schema behind an aggregator that handles
///   upstream authentication itself
///
/// When a provider expects a format other than Anthropic, the proxy
/// translates requests and responses (including SSE streams) in both
/// directions.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiFormat {
    #[default]
    Anthropic,
    Openai,
    Plano,
}

impl ApiFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
            Self::Plano => "plano",
        }
    }

    /// Default endpoint path for this format
    pub fn endpoint_path(&self) -> &'static str {
        match self {
            Self::Anthropic => "/v1/messages",
            Self::Openai | Self::Plano => "/v1/chat/completions",
        }
    }
}

impl std::fmt::Display for ApiFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Circuit breaker
// ─────────────────────────────────────────────────────────────────────────────

/// Per-provider circuit breaker settings
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_breaker_enabled")]
    pub enabled: bool,
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    /// Seconds the circuit stays open before admitting a probe
    #[serde(default = "default_breaker_timeout")]
    pub timeout_secs: u64,
}

fn default_breaker_enabled() -> bool {
    true
}

fn default_max_failures() -> u32 {
    5
}

fn default_breaker_timeout() -> u64 {
    30
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: default_breaker_enabled(),
            max_failures: default_max_failures(),
            timeout_secs: default_breaker_timeout(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Provider backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Base URL for the provider's API (e.g. "https://api.anthropic.com")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Wire format the backend speaks
    #[serde(default)]
    pub format: ApiFormat,

    /// Single API key (direct value). Prefer env vars for the anthropic
    /// default provider; file keys are for local multi-provider setups.
    pub api_key: Option<String>,

    /// Multiple API keys rotated round robin across requests
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Value for the `anthropic-version` header (anthropic format only)
    pub version: Option<String>,

    /// Transport-level retries inside the HTTP client (not failover)
    #[serde(default)]
    pub max_retries: u32,

    /// Name of the provider to fail over to after a failure on this one
    pub fallback_provider: Option<String>,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            format: ApiFormat::Anthropic,
            api_key: None,
            api_keys: Vec::new(),
            version: Some("2023-06-01".to_string()),
            max_retries: 0,
            fallback_provider: None,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ProviderConfig {
    /// All configured keys: `api_keys` when non-empty, else the single key
    pub fn keys(&self) -> Vec<String> {
        if !self.api_keys.is_empty() {
            self.api_keys.clone()
        } else {
            self.api_key.iter().cloned().collect()
        }
    }

    /// Endpoint URL the adapter dispatches to
    pub fn endpoint_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.format.endpoint_path()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_per_format() {
        let anthropic = ProviderConfig::default();
        assert_eq!(
            anthropic.endpoint_url(),
            "https://api.anthropic.com/v1/messages"
        );

        let openai = ProviderConfig {
            base_url: "https://api.openai.com/".to_string(),
            format: ApiFormat::Openai,
            ..Default::default()
        };
        assert_eq!(
            openai.endpoint_url(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn keys_prefer_list_over_single() {
        let provider = ProviderConfig {
            api_key: Some("single".to_string()),
            api_keys: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        assert_eq!(provider.keys(), vec!["a", "b"]);

        let single = ProviderConfig {
            api_key: Some("single".to_string()),
            ..Default::default()
        };
        assert_eq!(single.keys(), vec!["single"]);
    }
}
