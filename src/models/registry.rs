//! Immutable table of model profiles and per-use-case routes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// What the narrative is for. Each use-case has its own primary/fallback
/// pair.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum UseCase {
    /// Full antenatal risk assessment report.
    RiskAssessment,
    /// Short triage guidance for urgent presentations.
    EmergencyTriage,
    /// Follow-up schedule planning.
    FollowUpPlanning,
}

impl UseCase {
    /// Every use-case; the registry must route all of them.
    pub const ALL: [Self; 3] = [
        Self::RiskAssessment,
        Self::EmergencyTriage,
        Self::FollowUpPlanning,
    ];

    /// Stable lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RiskAssessment => "risk_assessment",
            Self::EmergencyTriage => "emergency_triage",
            Self::FollowUpPlanning => "follow_up_planning",
        }
    }
}

impl fmt::Display for UseCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating parameters of one AI model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModelProfile {
    /// Provider-side model identifier.
    pub name: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Total context window in tokens.
    pub context_window: u32,
    /// Default sampling temperature.
    pub temperature: f32,
    /// Price per generated token (USD).
    pub cost_per_token: f64,
}

impl ModelProfile {
    /// Convenience constructor.
    pub fn new(
        name: impl Into<String>,
        max_tokens: u32,
        context_window: u32,
        temperature: f32,
        cost_per_token: f64,
    ) -> Self {
        Self {
            name: name.into(),
            max_tokens,
            context_window,
            temperature,
            cost_per_token,
        }
    }
}

/// Primary and fallback model names for one use-case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RouteConfig {
    /// Model tried first (with retries).
    pub primary: String,
    /// Model tried once after the primary is exhausted.
    pub fallback: String,
}

/// A route with both profiles resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRoute {
    /// Model tried first.
    pub primary: ModelProfile,
    /// Model tried once after the primary is exhausted.
    pub fallback: ModelProfile,
}

/// Errors raised while building a registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A route or the override names a model with no profile.
    #[error("{context} references unknown model '{model}'")]
    UnknownModel {
        /// Where the reference appeared (e.g. `route risk_assessment.primary`).
        context: String,
        /// The missing model name.
        model: String,
    },

    /// A use-case has no route.
    #[error("use-case '{0}' has no primary/fallback route")]
    MissingRoute(UseCase),

    /// A route uses the same model as primary and fallback.
    #[error("use-case '{use_case}' uses '{model}' as both primary and fallback")]
    FallbackSameAsPrimary {
        /// Offending use-case.
        use_case: UseCase,
        /// Model named twice.
        model: String,
    },

    /// Two profiles share a name.
    #[error("duplicate model profile '{0}'")]
    DuplicateProfile(String),
}

/// One resolved route per use-case; a struct rather than a map so lookups
/// are total.
#[derive(Debug, Clone, PartialEq)]
struct RouteTable {
    risk_assessment: ModelRoute,
    emergency_triage: ModelRoute,
    follow_up_planning: ModelRoute,
}

impl RouteTable {
    fn get(&self, use_case: UseCase) -> &ModelRoute {
        match use_case {
            UseCase::RiskAssessment => &self.risk_assessment,
            UseCase::EmergencyTriage => &self.emergency_triage,
            UseCase::FollowUpPlanning => &self.follow_up_planning,
        }
    }
}

/// Immutable registry of model profiles.
///
/// Every use-case is guaranteed to have a resolved primary and fallback, so
/// lookups after construction cannot fail.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRegistry {
    profiles: BTreeMap<String, ModelProfile>,
    routes: RouteTable,
    emergency_override: ModelProfile,
}

impl ModelRegistry {
    /// Build and validate a registry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if a profile name is duplicated, a use-case
    /// has no route, a route or the override references an unknown model, or
    /// a route's fallback equals its primary.
    pub fn new(
        profiles: Vec<ModelProfile>,
        routes: &BTreeMap<UseCase, RouteConfig>,
        emergency_override_model: &str,
    ) -> Result<Self, RegistryError> {
        let mut by_name = BTreeMap::new();
        for profile in profiles {
            let name = profile.name.clone();
            if by_name.insert(name.clone(), profile).is_some() {
                return Err(RegistryError::DuplicateProfile(name));
            }
        }

        let resolve = |context: String, model: &str| {
            by_name
                .get(model)
                .cloned()
                .ok_or_else(|| RegistryError::UnknownModel {
                    context,
                    model: model.to_string(),
                })
        };

        let resolve_route = |use_case: UseCase| -> Result<ModelRoute, RegistryError> {
            let route = routes
                .get(&use_case)
                .ok_or(RegistryError::MissingRoute(use_case))?;
            if route.primary == route.fallback {
                return Err(RegistryError::FallbackSameAsPrimary {
                    use_case,
                    model: route.primary.clone(),
                });
            }
            Ok(ModelRoute {
                primary: resolve(format!("route {use_case}.primary"), &route.primary)?,
                fallback: resolve(format!("route {use_case}.fallback"), &route.fallback)?,
            })
        };

        let resolved = RouteTable {
            risk_assessment: resolve_route(UseCase::RiskAssessment)?,
            emergency_triage: resolve_route(UseCase::EmergencyTriage)?,
            follow_up_planning: resolve_route(UseCase::FollowUpPlanning)?,
        };

        let emergency_override =
            resolve("emergency_override_model".to_string(), emergency_override_model)?;

        Ok(Self {
            profiles: by_name,
            routes: resolved,
            emergency_override,
        })
    }

    /// The built-in registry: Sonnet primary, Haiku fallback, Opus for
    /// emergencies.
    pub fn standard() -> Self {
        let sonnet = ModelProfile::new("claude-3-5-sonnet-20241022", 2048, 200_000, 0.4, 0.000_015);
        let haiku = ModelProfile::new("claude-3-5-haiku-20241022", 2048, 200_000, 0.4, 0.000_004);
        let opus = ModelProfile::new("claude-3-opus-20240229", 2048, 200_000, 0.2, 0.000_075);

        let route = |primary: &ModelProfile, fallback: &ModelProfile| ModelRoute {
            primary: primary.clone(),
            fallback: fallback.clone(),
        };
        let routes = RouteTable {
            risk_assessment: route(&sonnet, &haiku),
            emergency_triage: route(&opus, &sonnet),
            follow_up_planning: route(&haiku, &sonnet),
        };

        Self {
            profiles: [&sonnet, &haiku, &opus]
                .into_iter()
                .map(|p| (p.name.clone(), p.clone()))
                .collect(),
            routes,
            emergency_override: opus,
        }
    }

    /// Resolved route for a use-case.
    pub fn route(&self, use_case: UseCase) -> &ModelRoute {
        self.routes.get(use_case)
    }

    /// Route names in the shape accepted by [`ModelRegistry::new`].
    pub fn route_configs(&self) -> BTreeMap<UseCase, RouteConfig> {
        UseCase::ALL
            .into_iter()
            .map(|use_case| {
                let route = self.route(use_case);
                (
                    use_case,
                    RouteConfig {
                        primary: route.primary.name.clone(),
                        fallback: route.fallback.name.clone(),
                    },
                )
            })
            .collect()
    }

    /// Model substituted for Critical-tier requests.
    pub fn emergency_override(&self) -> &ModelProfile {
        &self.emergency_override
    }

    /// Look up a profile by name.
    pub fn profile(&self, name: &str) -> Option<&ModelProfile> {
        self.profiles.get(name)
    }

    /// All profiles, ordered by name.
    pub fn profiles(&self) -> impl Iterator<Item = &ModelProfile> {
        self.profiles.values()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
