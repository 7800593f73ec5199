//! Routing configuration: preferences, per-task overrides, provider profiles

use serde::Deserialize;
use std::collections::HashMap;

/// Scoring mode that weights provider profiles during selection
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Preference {
    Cost,
    Speed,
    Quality,
    #[default]
    Balanced,
}

impl Preference {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cost => "cost",
            Self::Speed => "speed",
            Self::Quality => "quality",
            Self::Balanced => "balanced",
        }
    }
}

/// A provider's self-declared profile, each axis 1-10
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ProviderProfile {
    pub speed: u8,
    pub cost: u8,
    pub quality: u8,
}

impl ProviderProfile {
    /// Score under a preference:
    /// cost -> 2*cost + quality, speed -> 2*speed + quality,
    /// quality -> 3*quality, balanced -> speed + cost + quality
    pub fn score(&self, preference: Preference) -> u32 {
        let (s, c, q) = (
            self.speed as u32,
            self.cost as u32,
            self.quality as u32,
        );
        match preference {
            Preference::Cost => 2 * c + q,
            Preference::Speed => 2 * s + q,
            Preference::Quality => 3 * q,
            Preference::Balanced => s + c + q,
        }
    }

    /// Load-balance weight: the profile average
    pub fn weight(&self) -> f64 {
        (self.speed as f64 + self.cost as f64 + self.quality as f64) / 3.0
    }
}

/// Per-task routing override
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskRouting {
    /// Replaces the caller's preference for this task
    pub preference: Option<Preference>,
    /// Explicit candidate providers for this task
    #[serde(default)]
    pub providers: Vec<String>,
}

/// Routing configuration assembled from the `[routing]` section
#[derive(Debug, Clone, Default)]
pub struct RoutingConfig {
    pub default_preference: Preference,
    /// Task (agent) name -> routing override
    pub tasks: HashMap<String, TaskRouting>,
    /// Provider name -> profile used for scoring and weighting
    pub provider_profiles: HashMap<String, ProviderProfile>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileRouting {
    pub preferences: Option<FilePreferences>,
    #[serde(default)]
    pub tasks: HashMap<String, TaskRouting>,
    #[serde(default)]
    pub provider_profiles: HashMap<String, ProviderProfile>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FilePreferences {
    pub default: Option<Preference>,
}

impl RoutingConfig {
    pub(crate) fn from_file(file: Option<FileRouting>) -> Self {
        let file = file.unwrap_or_default();
        Self {
            default_preference: file
                .preferences
                .and_then(|p| p.default)
                .unwrap_or_default(),
            tasks: file.tasks,
            provider_profiles: file.provider_profiles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(speed: u8, cost: u8, quality: u8) -> ProviderProfile {
        ProviderProfile {
            speed,
            cost,
            quality,
        }
    }

    #[test]
    fn score_formulas() {
        let p = profile(8, 4, 6);
        assert_eq!(p.score(Preference::Cost), 2 * 4 + 6);
        assert_eq!(p.score(Preference::Speed), 2 * 8 + 6);
        assert_eq!(p.score(Preference::Quality), 3 * 6);
        assert_eq!(p.score(Preference::Balanced), 8 + 4 + 6);
    }

    #[test]
    fn weight_is_profile_average() {
        assert!((profile(9, 3, 6).weight() - 6.0).abs() < f64::EPSILON);
    }
}
