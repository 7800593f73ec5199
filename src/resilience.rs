//! Circuit breaking and failover around provider adapters
//!
//! Each configured provider is wrapped in a [`ResilientProvider`]: a circuit
//! breaker gates every call, and a failed request may be re-issued exactly
//! once against a named fallback provider. Breaker state is owned by the
//! wrapper and mutated only behind its lock; nothing else in the system sees
//! the counters.
//!
//! Breaker transitions:
//!
//! ```text
//!            max_failures consecutive failures
//! Closed ───────────────────────────────────────► Open
//!   ▲                                               │ timeout elapsed
//!   │ one success                                   ▼
//!   └───────────────────────────────────────── HalfOpen
//!                     one failure ────────────────► Open
//! ```
//!
//! In the open state `forward` returns immediately with a circuit_open error
//! and never touches the network. The router consults [`ProviderRegistry::
//! is_open`] to exclude unhealthy candidates before selection.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::{CircuitBreakerConfig, ProviderConfig};
use crate::providers::{
    build_adapter, ForwardRequest, ProviderAdapter, ProviderError, ProviderResponse,
};

// ─────────────────────────────────────────────────────────────────────────────
// Circuit breaker
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    /// One probe at a time while half-open
    probe_in_flight: bool,
}

/// Three-state gate that fast-fails requests to an unhealthy provider
#[derive(Debug)]
pub struct CircuitBreaker {
    enabled: bool,
    max_failures: u32,
    timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(enabled: bool, max_failures: u32, timeout: Duration) -> Self {
        Self {
            enabled,
            max_failures: max_failures.max(1),
            timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(
            config.enabled,
            config.max_failures,
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Current state, applying the open → half-open timeout transition
    pub fn state(&self) -> BreakerState {
        if !self.enabled {
            return BreakerState::Closed;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.advance(&mut inner);
        inner.state
    }

    /// Whether the circuit currently refuses requests
    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    /// Ask to make a call. Returns false when the circuit refuses it.
    pub fn try_acquire(&self) -> bool {
        if !self.enabled {
            return true;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.advance(&mut inner);
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.last_failure = Some(Instant::now());
        inner.probe_in_flight = false;
        match inner.state {
            BreakerState::HalfOpen => {
                // Failed probe reopens immediately
                inner.state = BreakerState::Open;
            }
            _ => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.max_failures {
                    inner.state = BreakerState::Open;
                }
            }
        }
    }

    /// Open → half-open once the timeout since the last failure has elapsed
    fn advance(&self, inner: &mut BreakerInner) {
        if inner.state == BreakerState::Open {
            let elapsed = inner
                .last_failure
                .map(|at| at.elapsed() >= self.timeout)
                .unwrap_or(true);
            if elapsed {
                inner.state = BreakerState::HalfOpen;
                inner.probe_in_flight = false;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resilient provider
// ─────────────────────────────────────────────────────────────────────────────

/// One provider adapter plus its breaker and optional fallback name
pub struct ResilientProvider {
    adapter: Arc<dyn ProviderAdapter>,
    breaker: CircuitBreaker,
    fallback: Option<String>,
}

impl ResilientProvider {
    pub fn new(
        adapter: Arc<dyn ProviderAdapter>,
        breaker: CircuitBreaker,
        fallback: Option<String>,
    ) -> Self {
        Self {
            adapter,
            breaker,
            fallback,
        }
    }

    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    /// One gated call through the breaker.
    ///
    /// A 5xx response, network error, or timeout counts as a failure; any
    /// other outcome (including 4xx) resets the failure streak.
    pub async fn forward_once(
        &self,
        req: ForwardRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        if !self.breaker.try_acquire() {
            return Err(ProviderError::CircuitOpen(self.name().to_string()));
        }

        match self.adapter.forward(req).await {
            Ok(response) => {
                if response.status >= 500 {
                    self.breaker.record_failure();
                } else {
                    self.breaker.record_success();
                }
                Ok(response)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// All configured providers, wrapped and addressable by name
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<ResilientProvider>>,
}

impl ProviderRegistry {
    pub fn from_config(
        configs: &HashMap<String, ProviderConfig>,
        client: reqwest::Client,
    ) -> Self {
        let providers = configs
            .iter()
            .map(|(name, config)| {
                let adapter = build_adapter(name, config, client.clone());
                let breaker = CircuitBreaker::from_config(&config.circuit_breaker);
                (
                    name.clone(),
                    Arc::new(ResilientProvider::new(
                        adapter,
                        breaker,
                        config.fallback_provider.clone(),
                    )),
                )
            })
            .collect();
        Self { providers }
    }

    /// Build a registry from pre-wrapped providers (tests)
    pub fn from_providers(providers: HashMap<String, Arc<ResilientProvider>>) -> Self {
        Self { providers }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ResilientProvider>> {
        self.providers.get(name)
    }

    /// Whether a provider's circuit currently refuses requests.
    /// Unknown providers read as open so the router skips them.
    pub fn is_open(&self, name: &str) -> bool {
        self.providers
            .get(name)
            .map(|p| p.breaker.is_open())
            .unwrap_or(true)
    }

    /// Forward with failover: one attempt on the named provider, and on
    /// failure one more on its declared fallback. No further retries here.
    pub async fn forward(
        &self,
        name: &str,
        req: ForwardRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let provider = self
            .get(name)
            .ok_or_else(|| ProviderError::Network(format!("unknown provider '{}'", name)))?;

        let result = provider.forward_once(req.clone()).await;
        let failed = match &result {
            Ok(response) => response.status >= 500,
            Err(_) => true,
        };

        if failed {
            if let Some(fallback_name) = &provider.fallback {
                if let Some(fallback) = self.get(fallback_name) {
                    tracing::warn!(
                        provider = name,
                        fallback = %fallback_name,
                        "Primary failed, failing over"
                    );
                    return fallback.forward_once(req).await;
                }
                tracing::error!(
                    provider = name,
                    fallback = %fallback_name,
                    "Fallback provider not found in registry"
                );
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessagesRequest;
    use crate::providers::ProviderBody;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn forward_request() -> ForwardRequest {
        let request: MessagesRequest = serde_json::from_str(
            r#"{"model": "claude-3-opus", "max_tokens": 8, "messages": [{"role": "user", "content": "hi"}]}"#,
        )
        .unwrap();
        ForwardRequest {
            request,
            headers: reqwest::header::HeaderMap::new(),
            original_model: None,
        }
    }

    /// Adapter that replays a scripted sequence of statuses (0 = network error)
    struct ScriptedAdapter {
        name: String,
        script: Vec<u16>,
        calls: AtomicUsize,
    }

    impl ScriptedAdapter {
        fn new(name: &str, script: Vec<u16>) -> Self {
            Self {
                name: name.to_string(),
                script,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn forward(&self, _req: ForwardRequest) -> Result<ProviderResponse, ProviderError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            let status = self.script.get(idx).copied().unwrap_or(200);
            if status == 0 {
                return Err(ProviderError::Network("connection refused".to_string()));
            }
            Ok(ProviderResponse {
                status,
                content_type: "application/json",
                body: ProviderBody::Buffered(Bytes::from_static(b"{}")),
                first_byte_ms: 1,
            })
        }
    }

    #[test]
    fn breaker_opens_after_max_failures() {
        let breaker = CircuitBreaker::new(true, 2, Duration::from_secs(60));
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn breaker_success_resets_streak() {
        let breaker = CircuitBreaker::new(true, 2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn breaker_half_open_after_timeout_admits_single_probe() {
        let breaker = CircuitBreaker::new(true, 1, Duration::from_millis(0));
        breaker.record_failure();
        // Timeout of zero: the next check transitions to half-open
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(breaker.try_acquire(), "first probe admitted");
        assert!(!breaker.try_acquire(), "second concurrent probe refused");
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn breaker_failed_probe_reopens() {
        let breaker = CircuitBreaker::new(true, 1, Duration::from_millis(0));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(breaker.try_acquire());
        breaker.record_failure();
        // Timeout zero flips it straight back to half-open on inspection, so
        // check the raw transition through try_acquire with a long timeout
        let slow = CircuitBreaker::new(true, 1, Duration::from_secs(60));
        slow.record_failure();
        assert_eq!(slow.state(), BreakerState::Open);
    }

    #[test]
    fn disabled_breaker_never_opens() {
        let breaker = CircuitBreaker::new(false, 1, Duration::from_secs(60));
        for _ in 0..10 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.try_acquire());
    }

    #[tokio::test]
    async fn open_circuit_fails_fast_without_network() {
        let adapter = Arc::new(ScriptedAdapter::new("a", vec![500, 500]));
        let provider = ResilientProvider::new(
            adapter.clone(),
            CircuitBreaker::new(true, 2, Duration::from_secs(60)),
            None,
        );

        // Two 500s open the circuit
        for _ in 0..2 {
            let response = provider.forward_once(forward_request()).await.unwrap();
            assert_eq!(response.status, 500);
        }
        assert_eq!(provider.breaker.state(), BreakerState::Open);

        // Third call refused before the adapter is reached
        let err = provider.forward_once(forward_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::CircuitOpen(_)));
        assert_eq!(adapter.call_count(), 2, "network untouched while open");
    }

    #[tokio::test]
    async fn failover_reissues_once_against_fallback() {
        let primary_adapter = Arc::new(ScriptedAdapter::new("primary", vec![0]));
        let fallback_adapter = Arc::new(ScriptedAdapter::new("backup", vec![200]));

        let mut providers = HashMap::new();
        providers.insert(
            "primary".to_string(),
            Arc::new(ResilientProvider::new(
                primary_adapter.clone(),
                CircuitBreaker::new(true, 5, Duration::from_secs(60)),
                Some("backup".to_string()),
            )),
        );
        providers.insert(
            "backup".to_string(),
            Arc::new(ResilientProvider::new(
                fallback_adapter.clone(),
                CircuitBreaker::new(true, 5, Duration::from_secs(60)),
                None,
            )),
        );
        let registry = ProviderRegistry::from_providers(providers);

        let response = registry.forward("primary", forward_request()).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(primary_adapter.call_count(), 1);
        assert_eq!(fallback_adapter.call_count(), 1);
    }

    #[tokio::test]
    async fn no_fallback_propagates_failure() {
        let adapter = Arc::new(ScriptedAdapter::new("only", vec![0]));
        let mut providers = HashMap::new();
        providers.insert(
            "only".to_string(),
            Arc::new(ResilientProvider::new(
                adapter,
                CircuitBreaker::new(true, 5, Duration::from_secs(60)),
                None,
            )),
        );
        let registry = ProviderRegistry::from_providers(providers);

        let err = registry.forward("only", forward_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
    }

    #[tokio::test]
    async fn fallback_failure_is_not_retried_further() {
        let primary = Arc::new(ScriptedAdapter::new("primary", vec![503]));
        let fallback = Arc::new(ScriptedAdapter::new("backup", vec![502]));
        let mut providers = HashMap::new();
        providers.insert(
            "primary".to_string(),
            Arc::new(ResilientProvider::new(
                primary.clone(),
                CircuitBreaker::new(true, 5, Duration::from_secs(60)),
                Some("backup".to_string()),
            )),
        );
        providers.insert(
            "backup".to_string(),
            Arc::new(ResilientProvider::new(
                fallback.clone(),
                CircuitBreaker::new(true, 5, Duration::from_secs(60)),
                None,
            )),
        );
        let registry = ProviderRegistry::from_providers(providers);

        let response = registry.forward("primary", forward_request()).await.unwrap();
        assert_eq!(response.status, 502, "fallback outcome surfaces as-is");
        assert_eq!(primary.call_count(), 1);
        assert_eq!(fallback.call_count(), 1);
    }
}
