//! Model-tier routing.
//!
//! The loops never name a model. They ask for a [`ModelTier`]: the cheap tier
//! for action selection and task proposals, the main tier for command turns
//! and replies. [`TierRouting`] maps each tier to a concrete model slug.

use serde::{Deserialize, Serialize};

/// Default model for main-tier calls.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

/// Default model for cheap-tier calls.
pub const DEFAULT_CHEAP_MODEL: &str = "google/gemini-2.5-flash";

/// Capability/cost tier requested by a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Fast, inexpensive selection and classification calls.
    Cheap,
    #[default]
    Main,
}

/// Tier-to-model mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierRouting {
    /// Use a single model for every tier.
    Single(String),
    /// Separate models for the cheap and main tiers.
    Split { cheap: String, main: String },
}

impl TierRouting {
    pub fn split(cheap: impl Into<String>, main: impl Into<String>) -> Self {
        TierRouting::Split {
            cheap: cheap.into(),
            main: main.into(),
        }
    }

    pub fn model_for(&self, tier: ModelTier) -> &str {
        match self {
            TierRouting::Single(model) => model,
            TierRouting::Split { cheap, main } => match tier {
                ModelTier::Cheap => cheap,
                ModelTier::Main => main,
            },
        }
    }
}

impl Default for TierRouting {
    fn default() -> Self {
        TierRouting::split(DEFAULT_CHEAP_MODEL, DEFAULT_MODEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_ignores_tier() {
        let r = TierRouting::Single("m".into());
        assert_eq!(r.model_for(ModelTier::Cheap), "m");
        assert_eq!(r.model_for(ModelTier::Main), "m");
    }

    #[test]
    fn split_routes_by_tier() {
        let r = TierRouting::split("cheap", "main");
        assert_eq!(r.model_for(ModelTier::Cheap), "cheap");
        assert_eq!(r.model_for(ModelTier::Main), "main");
    }

    #[test]
    fn default_uses_known_models() {
        let r = TierRouting::default();
        assert_eq!(r.model_for(ModelTier::Main), DEFAULT_MODEL);
        assert_eq!(r.model_for(ModelTier::Cheap), DEFAULT_CHEAP_MODEL);
    }
}
