//! Provider selection
//!
//! Maps a logical request (agent name, preference, model) to a concrete
//! (provider, model) pair:
//!
//! 1. A subagent mapping, when enabled and matching, wins outright.
//! 2. A task entry in the routing config may override the preference and
//!    restrict the candidate set.
//! 3. Candidates whose circuit is open are excluded; an empty set is a
//!    routing failure the pipeline surfaces as 503.
//! 4. Remaining candidates are ranked by their profile score under the
//!    effective preference, the top three kept, and one picked by a weighted
//!    pseudo-random draw. The RNG is seedable so selection is repeatable in
//!    tests.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{Preference, ProviderProfile, RoutingConfig, SubagentsConfig};

/// Default profile axis value for providers without a configured profile
const DEFAULT_PROFILE_AXIS: u8 = 5;

/// How many ranked candidates participate in the weighted draw
const TOP_CANDIDATES: usize = 3;

/// Logical routing inputs extracted from one request
#[derive(Debug, Clone, Default)]
pub struct RouteRequest {
    /// Agent name from the x-agent-name header, if present
    pub agent_name: Option<String>,
    /// Caller preference, if the client expressed one
    pub preference: Option<Preference>,
    /// Model the client asked for
    pub model: String,
}

/// The routing outcome recorded on the request row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub provider: String,
    /// Model to send upstream
    pub model: String,
    pub subagent_name: Option<String>,
    pub original_model: String,
    /// Set only when the model was rewritten
    pub routed_model: Option<String>,
}

pub struct Router {
    subagents: SubagentsConfig,
    routing: RoutingConfig,
    rng: Mutex<StdRng>,
}

impl Router {
    pub fn new(subagents: SubagentsConfig, routing: RoutingConfig) -> Self {
        Self {
            subagents,
            routing,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic router for tests
    pub fn with_seed(subagents: SubagentsConfig, routing: RoutingConfig, seed: u64) -> Self {
        Self {
            subagents,
            routing,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Select a provider and model.
    ///
    /// `available` is the full provider list (sorted by the caller for
    /// repeatability); `is_open` reports circuit state per provider name.
    /// Returns None when no candidate survives filtering.
    pub fn select(
        &self,
        req: &RouteRequest,
        available: &[String],
        is_open: impl Fn(&str) -> bool,
    ) -> Option<RouteDecision> {
        // Subagent mapping wins over everything else
        if let Some(agent) = req.agent_name.as_deref() {
            if let Some((provider, model)) = self.subagents.resolve(agent) {
                let routed = if model != req.model {
                    Some(model.clone())
                } else {
                    None
                };
                tracing::debug!(
                    agent,
                    provider = %provider,
                    model = %model,
                    "Routed via subagent mapping"
                );
                return Some(RouteDecision {
                    provider,
                    model,
                    subagent_name: Some(agent.to_string()),
                    original_model: req.model.clone(),
                    routed_model: routed,
                });
            }
        }

        // Task config may override preference and candidates
        let task = req
            .agent_name
            .as_deref()
            .and_then(|agent| self.routing.tasks.get(agent));

        let preference = task
            .and_then(|t| t.preference)
            .or(req.preference)
            .unwrap_or(self.routing.default_preference);

        let mut candidates: Vec<String> = match task.filter(|t| !t.providers.is_empty()) {
            Some(t) => t.providers.clone(),
            None => available.to_vec(),
        };

        // Circuit-open candidates drop out before scoring
        candidates.retain(|name| !is_open(name));
        if candidates.is_empty() {
            return None;
        }

        // Rank by preference score; ties break by name so a seeded RNG sees
        // a stable candidate order
        let mut scored: Vec<(String, u32, f64)> = candidates
            .into_iter()
            .map(|name| {
                let profile = self.profile_for(&name);
                (name, profile.score(preference), profile.weight())
            })
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(TOP_CANDIDATES);

        let provider = self.weighted_pick(&scored);
        tracing::debug!(
            provider = %provider,
            preference = preference.as_str(),
            candidates = scored.len(),
            "Routed via preference scoring"
        );

        Some(RouteDecision {
            provider,
            model: req.model.clone(),
            subagent_name: None,
            original_model: req.model.clone(),
            routed_model: None,
        })
    }

    fn profile_for(&self, provider: &str) -> ProviderProfile {
        self.routing
            .provider_profiles
            .get(provider)
            .copied()
            .unwrap_or(ProviderProfile {
                speed: DEFAULT_PROFILE_AXIS,
                cost: DEFAULT_PROFILE_AXIS,
                quality: DEFAULT_PROFILE_AXIS,
            })
    }

    /// Weighted pseudo-random pick over the top candidates; weights are the
    /// profile average, 5.0 for profile-less providers
    fn weighted_pick(&self, scored: &[(String, u32, f64)]) -> String {
        if scored.len() == 1 {
            return scored[0].0.clone();
        }
        let total: f64 = scored.iter().map(|(_, _, w)| w).sum();
        let mut roll = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.gen::<f64>() * total
        };
        for (name, _, weight) in scored {
            if roll < *weight {
                return name.clone();
            }
            roll -= weight;
        }
        scored[scored.len() - 1].0.clone()
    }
}
