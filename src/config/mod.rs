//! # Stage: Declarative Engine Configuration
//!
//! ## Responsibility
//! Parse and validate the TOML file that sets rate limits, retry policy,
//! model routing, scoring policy and observability for the engine:
//! ```text
//! risk-engine --config risk-engine.toml
//! ```
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `EngineConfig`
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Complete defaults: an empty file yields the built-in configuration
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Building the engine from config (that belongs to `engine`)
//! - Reading API keys (that belongs to `provider`)

pub mod loader;
pub mod validation;

pub use loader::{load_from_file, load_from_str};
pub use validation::{validate, ConfigError};

use crate::catalog::{CatalogError, RiskFactorCatalog, RiskFactorDefinition};
use crate::gateway::GatewaySettings;
use crate::models::{ModelProfile, ModelRegistry, RegistryError, RouteConfig, UseCase};
use crate::resilience::{BackoffPolicy, RateLimitConfig};
use crate::scoring::{ScoringPolicy, TierThresholds};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

// ── Default value functions ──────────────────────────────────────────────

/// Default sustained throughput: 60 requests per minute.
fn default_requests_per_minute() -> u32 {
    60
}

/// Default bucket capacity: 5.
fn default_burst_limit() -> u32 {
    5
}

/// Default provider cooldown after a 429: 10 s.
fn default_cooldown_period_ms() -> u64 {
    10_000
}

/// Default primary attempts: 3.
fn default_max_retries() -> u32 {
    3
}

/// Default first backoff: 1 s.
fn default_initial_delay_ms() -> u64 {
    1_000
}

/// Default backoff cap: 10 s.
fn default_max_delay_ms() -> u64 {
    10_000
}

/// Default per-attempt timeout: 30 s.
fn default_attempt_timeout_ms() -> u64 {
    30_000
}

/// Default rate-limit queue budget: 10 s.
fn default_queue_wait_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

/// Default emergency model: the standard registry's override.
fn default_emergency_override_model() -> String {
    ModelRegistry::standard().emergency_override().name.clone()
}

fn default_profiles() -> Vec<ModelProfile> {
    ModelRegistry::standard().profiles().cloned().collect()
}

fn default_routes() -> BTreeMap<UseCase, RouteConfig> {
    ModelRegistry::standard().route_configs()
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for an engine instance.
///
/// Every section is optional; missing sections take the built-in defaults.
///
/// # Example
///
/// ```toml
/// [rate_limit]
/// requests_per_minute = 60
/// burst_limit = 5
///
/// [retry]
/// max_retries = 3
/// attempt_timeout_ms = 30000
///
/// [scoring]
/// policy = "weighted"
/// ```
///
/// # Panics
///
/// This type never panics during construction or access.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Token-bucket settings.
    pub rate_limit: RateLimitSection,
    /// Retry, timeout and backpressure settings.
    pub retry: RetrySection,
    /// Model profiles and routing.
    pub models: ModelsSection,
    /// Scoring policy, thresholds and optional custom catalog.
    pub scoring: ScoringSection,
    /// Logging and metrics.
    pub observability: ObservabilitySection,
}

// ── Rate limit ───────────────────────────────────────────────────────────

/// Token-bucket settings shared by all requests.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RateLimitSection {
    /// Sustained throughput (refill rate × 60).
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Bucket capacity.
    #[serde(default = "default_burst_limit")]
    pub burst_limit: u32,
    /// Token issuance pause after the provider answers 429.
    #[serde(default = "default_cooldown_period_ms")]
    pub cooldown_period_ms: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            burst_limit: default_burst_limit(),
            cooldown_period_ms: default_cooldown_period_ms(),
        }
    }
}

// ── Retry ────────────────────────────────────────────────────────────────

/// Retry, timeout and backpressure settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RetrySection {
    /// Primary-model attempts before the single fallback attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff before the second attempt.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Backoff cap.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Timeout of each provider call.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Longest acceptable wait for a rate-limit token.
    #[serde(default = "default_queue_wait_timeout_ms")]
    pub queue_wait_timeout_ms: u64,
    /// Add up to +25% random jitter to backoff.
    #[serde(default)]
    pub jitter: bool,
    /// Cap on concurrent provider calls; unlimited when absent.
    #[serde(default)]
    pub max_concurrent_in_flight: Option<usize>,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            queue_wait_timeout_ms: default_queue_wait_timeout_ms(),
            jitter: false,
            max_concurrent_in_flight: None,
        }
    }
}

// ── Models ───────────────────────────────────────────────────────────────

/// Model profiles, per-use-case routes and the emergency override.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ModelsSection {
    /// Model substituted for Critical-tier requests.
    #[serde(default = "default_emergency_override_model")]
    pub emergency_override_model: String,
    /// Available models.
    #[serde(default = "default_profiles")]
    pub profiles: Vec<ModelProfile>,
    /// Primary and fallback per use-case.
    #[serde(default = "default_routes")]
    pub routes: BTreeMap<UseCase, RouteConfig>,
}

impl Default for ModelsSection {
    fn default() -> Self {
        Self {
            emergency_override_model: default_emergency_override_model(),
            profiles: default_profiles(),
            routes: default_routes(),
        }
    }
}

// ── Scoring ──────────────────────────────────────────────────────────────

/// Scoring policy and catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ScoringSection {
    /// Which scorer to run.
    #[serde(default)]
    pub policy: ScoringPolicy,
    /// Tier lower bounds.
    #[serde(default)]
    pub thresholds: TierThresholds,
    /// Replacement factor table; the built-in catalog is used when absent.
    #[serde(default)]
    pub factors: Option<Vec<RiskFactorDefinition>>,
}

// ── Observability ────────────────────────────────────────────────────────

/// Logging and metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ObservabilitySection {
    /// Log output format; `LOG_FORMAT` overrides it.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Register Prometheus metrics at startup.
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

impl Default for ObservabilitySection {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            metrics_enabled: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Stable lowercase label, as accepted by `LOG_FORMAT`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────────

impl EngineConfig {
    /// Rate limiter parameters.
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_minute: self.rate_limit.requests_per_minute,
            burst_limit: self.rate_limit.burst_limit,
            cooldown_period: Duration::from_millis(self.rate_limit.cooldown_period_ms),
        }
    }

    /// Gateway parameters.
    pub fn gateway_settings(&self) -> GatewaySettings {
        let retry = &self.retry;
        GatewaySettings {
            max_retries: retry.max_retries,
            attempt_timeout: Duration::from_millis(retry.attempt_timeout_ms),
            queue_wait_timeout: Duration::from_millis(retry.queue_wait_timeout_ms),
            backoff: BackoffPolicy::new(
                Duration::from_millis(retry.initial_delay_ms),
                Duration::from_millis(retry.max_delay_ms),
            )
            .with_jitter(retry.jitter),
            max_concurrent_in_flight: retry.max_concurrent_in_flight,
        }
    }

    /// Build the model registry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if routes reference unknown models.
    pub fn build_registry(&self) -> Result<ModelRegistry, RegistryError> {
        ModelRegistry::new(
            self.models.profiles.clone(),
            &self.models.routes,
            &self.models.emergency_override_model,
        )
    }

    /// Build the risk factor catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the factor table or thresholds are invalid.
    pub fn build_catalog(&self) -> Result<RiskFactorCatalog, CatalogError> {
        let factors = self
            .scoring
            .factors
            .clone()
            .unwrap_or_else(crate::catalog::standard_factors);
        RiskFactorCatalog::new(factors, self.scoring.thresholds)
    }
}

/// Export the JSON Schema for [`EngineConfig`].
///
/// # Errors
///
/// Returns a [`serde_json::Error`] if serialization fails.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(EngineConfig);
    serde_json::to_string_pretty(&schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rate_limit_values() {
        assert_eq!(default_requests_per_minute(), 60);
        assert_eq!(default_burst_limit(), 5);
        assert_eq!(default_cooldown_period_ms(), 10_000);
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config: EngineConfig = toml::from_str("").expect("test: empty TOML parses");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.scoring.policy, ScoringPolicy::Weighted);
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_partial_models_table_keeps_standard_profiles_and_routes() {
        let config: EngineConfig = toml::from_str(
            r#"
[models]
emergency_override_model = "claude-3-5-sonnet-20241022"
"#,
        )
        .expect("test: partial models table parses");

        let standard = ModelRegistry::standard();
        assert_eq!(
            config.models.emergency_override_model,
            "claude-3-5-sonnet-20241022"
        );
        assert_eq!(config.models.routes, standard.route_configs());
        assert_eq!(
            config.models.profiles,
            standard.profiles().cloned().collect::<Vec<_>>()
        );
        let registry = config.build_registry().expect("test: registry builds");
        assert_eq!(
            registry.emergency_override().name,
            "claude-3-5-sonnet-20241022"
        );
    }

    #[test]
    fn test_default_models_match_standard_registry() {
        let registry = EngineConfig::default()
            .build_registry()
            .expect("test: default registry");
        assert_eq!(registry, ModelRegistry::standard());
    }

    #[test]
    fn test_default_catalog_matches_standard() {
        let catalog = EngineConfig::default()
            .build_catalog()
            .expect("test: default catalog");
        assert_eq!(catalog, RiskFactorCatalog::standard());
    }

    #[test]
    fn test_gateway_settings_conversion() {
        let mut config = EngineConfig::default();
        config.retry.initial_delay_ms = 250;
        config.retry.jitter = true;
        config.retry.max_concurrent_in_flight = Some(4);
        let settings = config.gateway_settings();
        assert_eq!(settings.backoff.initial_delay, Duration::from_millis(250));
        assert!(settings.backoff.jitter);
        assert_eq!(settings.max_concurrent_in_flight, Some(4));
        assert_eq!(settings.attempt_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_routes_parse_with_use_case_keys() {
        let toml_str = r#"
[models]
emergency_override_model = "big"

[[models.profiles]]
name = "big"
max_tokens = 1024
context_window = 100000
temperature = 0.2
cost_per_token = 0.0

[[models.profiles]]
name = "small"
max_tokens = 512
context_window = 50000
temperature = 0.5
cost_per_token = 0.0

[models.routes.risk_assessment]
primary = "big"
fallback = "small"

[models.routes.emergency_triage]
primary = "big"
fallback = "small"

[models.routes.follow_up_planning]
primary = "small"
fallback = "big"
"#;
        let config: EngineConfig = toml::from_str(toml_str).expect("test: parses");
        let registry = config.build_registry().expect("test: valid registry");
        assert_eq!(registry.route(UseCase::FollowUpPlanning).primary.name, "small");
        assert_eq!(registry.emergency_override().name, "big");
    }

    #[test]
    fn test_log_format_deserializes_from_snake_case() {
        let fmt: LogFormat = serde_json::from_str("\"json\"").expect("test: deserialization");
        assert_eq!(fmt, LogFormat::Json);
        assert_eq!(fmt.as_str(), "json");
    }

    #[test]
    fn test_export_schema_produces_valid_json() {
        let schema = export_schema().expect("test: schema export");
        let parsed: serde_json::Value =
            serde_json::from_str(&schema).expect("test: schema is valid JSON");
        assert!(parsed.get("properties").is_some() || parsed.get("$ref").is_some());
        assert!(schema.contains("requests_per_minute"));
    }
}
