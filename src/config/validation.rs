//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`EngineConfig`] that cannot
//! be expressed through the type system alone (range checks, cross-field
//! invariants, model references).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use super::EngineConfig;

/// Errors arising from configuration parsing, validation, or I/O.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "retry.initial_delay_ms").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A required environment variable is unset.
    #[error("environment variable {var} is not set")]
    MissingEnv {
        /// Variable name.
        var: String,
    },
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Validate all semantic constraints on an [`EngineConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Returns
///
/// - `Ok(())` if all constraints pass.
/// - `Err(Vec<ConfigError>)` with every violation found.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &EngineConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Rate limit ───────────────────────────────────────────────────
    let rate = &config.rate_limit;
    if rate.requests_per_minute == 0 {
        errors.push(invalid(
            "rate_limit.requests_per_minute",
            0,
            "must be at least 1",
        ));
    }
    if rate.burst_limit == 0 {
        errors.push(invalid("rate_limit.burst_limit", 0, "must be at least 1"));
    }

    // ── Retry settings ───────────────────────────────────────────────
    let retry = &config.retry;
    if retry.max_retries == 0 {
        errors.push(invalid("retry.max_retries", 0, "must be at least 1"));
    }
    if retry.initial_delay_ms > retry.max_delay_ms {
        errors.push(invalid(
            "retry.initial_delay_ms",
            retry.initial_delay_ms,
            "must be \u{2264} max_delay_ms",
        ));
    }
    if retry.attempt_timeout_ms == 0 {
        errors.push(invalid("retry.attempt_timeout_ms", 0, "must be at least 1"));
    }
    if retry.max_concurrent_in_flight == Some(0) {
        errors.push(invalid(
            "retry.max_concurrent_in_flight",
            0,
            "must be at least 1 when set",
        ));
    }

    // ── Models ───────────────────────────────────────────────────────
    for profile in &config.models.profiles {
        let path = |leaf: &str| format!("models.profiles.{}.{leaf}", profile.name);
        if profile.name.trim().is_empty() {
            errors.push(invalid("models.profiles.name", "\"\"", "must not be empty"));
        }
        if !(0.0..=1.0).contains(&profile.temperature) {
            errors.push(invalid(
                &path("temperature"),
                profile.temperature,
                "must be between 0.0 and 1.0",
            ));
        }
        if profile.max_tokens == 0 {
            errors.push(invalid(&path("max_tokens"), 0, "must be at least 1"));
        }
        if profile.max_tokens > profile.context_window {
            errors.push(invalid(
                &path("max_tokens"),
                profile.max_tokens,
                "must be \u{2264} context_window",
            ));
        }
        if !profile.cost_per_token.is_finite() || profile.cost_per_token < 0.0 {
            errors.push(invalid(
                &path("cost_per_token"),
                profile.cost_per_token,
                "must be a non-negative number",
            ));
        }
    }
    if let Err(e) = config.build_registry() {
        errors.push(invalid("models", "routes", &e.to_string()));
    }

    // ── Scoring ──────────────────────────────────────────────────────
    if let Err(e) = config.build_catalog() {
        errors.push(invalid("scoring", config.scoring.policy.as_str(), &e.to_string()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
