//! Model selection.
//!
//! Picks the primary/fallback pair for a use-case. A Critical-tier score
//! overrides the configured route with the registry's emergency model at a
//! capped temperature.
//!
//! | Tier                  | Primary                | Temperature            |
//! |-----------------------|------------------------|------------------------|
//! | Low / Medium / High   | use-case primary       | primary profile        |
//! | Critical              | emergency override     | `min(profile, 0.3)`    |

use super::registry::{ModelProfile, ModelRegistry, UseCase};
use crate::scoring::RiskTier;
use tracing::debug;

/// Highest temperature allowed when the emergency override applies.
pub const EMERGENCY_MAX_TEMPERATURE: f32 = 0.3;

/// Models and generation parameters chosen for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Use-case the selection was made for.
    pub use_case: UseCase,
    /// Model tried first (with retries).
    pub primary: ModelProfile,
    /// Model tried once after the primary is exhausted.
    pub fallback: ModelProfile,
    /// Sampling temperature of the primary, capped under the emergency
    /// override.
    pub temperature: f32,
    /// Context window of the primary model.
    pub context_window: u32,
    /// `true` if the Critical-tier override replaced the configured primary.
    pub emergency_override: bool,
}

impl Selection {
    /// Generation budget for `model`, never exceeding its context window.
    pub fn max_tokens_for(&self, model: &ModelProfile) -> u32 {
        model.max_tokens.min(model.context_window)
    }

    /// Sampling temperature for an attempt against `model`.
    ///
    /// Under the emergency override every model runs at its own profile
    /// temperature capped at [`EMERGENCY_MAX_TEMPERATURE`].
    pub fn temperature_for(&self, model: &ModelProfile) -> f32 {
        if self.emergency_override {
            model.temperature.min(EMERGENCY_MAX_TEMPERATURE)
        } else {
            model.temperature
        }
    }
}

/// Stateless model selector.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelSelector;

impl ModelSelector {
    /// Select models for `use_case` at `tier`.
    ///
    /// Pure function of its inputs: no hidden state, no randomness.
    ///
    /// When `tier` is [`RiskTier::Critical`] the primary becomes the
    /// registry's emergency override model and the temperature is capped at
    /// [`EMERGENCY_MAX_TEMPERATURE`]. If the override is also the configured
    /// fallback, the configured primary takes the fallback slot so the two
    /// models stay distinct.
    ///
    /// # Panics
    ///
    /// This function never panics.
    ///
    /// # Example
    ///
    /// ```rust
    /// use maternal_risk_engine::models::{ModelRegistry, ModelSelector, UseCase};
    /// use maternal_risk_engine::RiskTier;
    ///
    /// let registry = ModelRegistry::standard();
    /// let selection = ModelSelector::select(UseCase::RiskAssessment, RiskTier::Critical, &registry);
    /// assert!(selection.emergency_override);
    /// assert!(selection.temperature <= 0.3);
    /// ```
    pub fn select(use_case: UseCase, tier: RiskTier, registry: &ModelRegistry) -> Selection {
        let route = registry.route(use_case);

        if tier != RiskTier::Critical {
            return Selection {
                use_case,
                primary: route.primary.clone(),
                fallback: route.fallback.clone(),
                temperature: route.primary.temperature,
                context_window: route.primary.context_window,
                emergency_override: false,
            };
        }

        let primary = registry.emergency_override().clone();
        let fallback = if route.fallback.name == primary.name {
            route.primary.clone()
        } else {
            route.fallback.clone()
        };
        let temperature = primary.temperature.min(EMERGENCY_MAX_TEMPERATURE);

        debug!(
            use_case = %use_case,
            model = %primary.name,
            temperature,
            "critical tier: emergency override model selected"
        );

        Selection {
            use_case,
            context_window: primary.context_window,
            primary,
            fallback,
            temperature,
            emergency_override: true,
        }
    }
}
