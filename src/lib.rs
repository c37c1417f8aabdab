//! # maternal-risk-engine
//!
//! Pregnancy risk assessment over Tokio: a deterministic weighted scorer
//! paired with a resilient gateway that asks an external AI model for a
//! narrative report.
//!
//! ## Architecture
//!
//! ```text
//! PatientAssessmentInput
//!        │
//!        ▼
//!   RiskScorer ──────────────► RiskScore (always available)
//!        │                          │
//!        ▼                          │
//!   ModelSelector (tier override)   │
//!        │                          │
//!        ▼                          │
//!   InvocationGateway ── RateLimiter│
//!    (timeout/retry/backoff/fallback)
//!        │                          │
//!        ▼                          ▼
//!   ResultAssembler ─────────► RiskReport
//! ```
//!
//! The deterministic score never depends on the AI path: when every model
//! attempt fails the caller still receives a [`report::RiskReport`] with
//! `narrative_unavailable` set.

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod assessment;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod gateway;
pub mod metrics;
pub mod models;
pub mod prompt;
pub mod provider;
pub mod report;
pub mod resilience;
pub mod scoring;

// Re-exports for convenience
pub use assessment::{PatientAssessmentInput, Severity, ValidationError, Vitals};
pub use catalog::RiskFactorCatalog;
pub use engine::{PendingAssessment, RiskAssessmentEngine};
pub use gateway::{InvocationGateway, InvocationRequest, InvocationResult};
pub use models::{ModelRegistry, ModelSelector, UseCase};
pub use provider::{HttpProvider, ModelProvider, ProviderError, ScriptedProvider};
pub use report::{ResultAssembler, RiskReport};
pub use resilience::RateLimiter;
pub use scoring::{RiskScore, RiskScorer, RiskTier, ScoringPolicy};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"`: structured JSON output for log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`EngineError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing() -> Result<(), EngineError> {
    init_tracing_with(config::LogFormat::Pretty)
}

/// Like [`init_tracing`], falling back to `default` when `LOG_FORMAT` is
/// unset.
///
/// # Errors
///
/// Returns [`EngineError::Other`] if the global subscriber is already set.
pub fn init_tracing_with(default: config::LogFormat) -> Result<(), EngineError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| default.as_str().to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| EngineError::Other(format!("tracing init failed: {e}")))
}

/// Top-level engine errors.
///
/// Module-level errors convert into this type so binaries and callers can
/// propagate a single error with `?`.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Patient input was structurally invalid.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Configuration was missing, malformed, or failed validation.
    ///
    /// Returned at construction time so misconfiguration surfaces at startup
    /// rather than on the first assessment.
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    /// The model registry is inconsistent (e.g. a use-case routes to an
    /// unknown model).
    #[error(transparent)]
    Registry(#[from] models::RegistryError),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}
