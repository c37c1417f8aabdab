//! End-to-end tests for `RiskAssessmentEngine`
//!
//! Covers:
//! - The reference patient scores 45 / High with the expected factors
//! - Critical tier routes to the emergency model at low temperature
//! - Unreachable provider still yields the deterministic report
//! - Malformed narratives never override the deterministic tier
//! - Engine construction from a TOML file on disk
//! - Report JSON shape (camelCase)

use std::io::Write;
use std::sync::Arc;

use serde_json::json;

use maternal_risk_engine::config::{self, EngineConfig};
use maternal_risk_engine::provider::{ProviderResponse, ScriptedReply};
use maternal_risk_engine::report::NarrativeRecovery;
use maternal_risk_engine::{
    EngineError, ModelProvider, PatientAssessmentInput, ProviderError, RiskAssessmentEngine,
    RiskTier, ScoringPolicy, ScriptedProvider, UseCase,
};

// ============================================================================
// Helpers
// ============================================================================

const NARRATIVE: &str = r#"{
    "riskAssessment": {"riskLevel": "low", "summary": "Model thinks this is fine."},
    "recommendations": {"immediate": ["Recheck BP in 4 hours"], "shortTerm": [], "longTerm": []},
    "warningSystem": {"redFlags": ["Severe headache"], "yellowFlags": ["Swelling"]},
    "followUpSchedule": ["Week 28 visit"],
    "metadata": {}
}"#;

fn reference_patient() -> PatientAssessmentInput {
    let mut input = PatientAssessmentInput::default();
    input.vitals.blood_pressure = Some("150/95".into());
    input.vitals.bmi = Some(17.0);
    input.location = Some("rural".into());
    input
}

fn critical_patient() -> PatientAssessmentInput {
    let mut input = reference_patient();
    input.access_to_healthcare = Some(false);
    input
}

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.initial_delay_ms = 10;
    config.retry.max_delay_ms = 50;
    config
}

fn engine(provider: &Arc<ScriptedProvider>) -> RiskAssessmentEngine {
    let provider: Arc<dyn ModelProvider> = Arc::<ScriptedProvider>::clone(provider);
    RiskAssessmentEngine::from_config(&fast_config(), provider).expect("default config is valid")
}

// ============================================================================
// Scoring
// ============================================================================

#[test]
fn test_reference_patient_scores_45_high() {
    let provider = Arc::new(ScriptedProvider::new([]));
    let score = engine(&provider).score(&reference_patient());

    assert_eq!(score.value(), 45.0);
    assert_eq!(score.tier(), RiskTier::High);
    assert_eq!(
        score.factor_ids(),
        vec!["high_blood_pressure", "limited_access", "underweight"]
    );
}

#[test]
fn test_scoring_is_deterministic() {
    let provider = Arc::new(ScriptedProvider::new([]));
    let engine = engine(&provider);
    let first = engine.score(&critical_patient());
    for _ in 0..10 {
        assert_eq!(engine.score(&critical_patient()), first);
    }
}

// ============================================================================
// Emergency override
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_critical_tier_uses_emergency_model_and_low_temperature() {
    let provider = Arc::new(ScriptedProvider::always_text(NARRATIVE, 1));
    let report = engine(&provider)
        .assess(&critical_patient(), UseCase::RiskAssessment)
        .await;

    assert_eq!(report.risk_level, RiskTier::Critical);
    assert!(report.requires_emergency_escalation);
    assert!(report.metadata.emergency_override);

    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].model, "claude-3-opus-20240229");
    assert!(calls[0].temperature <= 0.3);
    assert!(calls[0].prompt.contains("critical tier"));
}

#[tokio::test(start_paused = true)]
async fn test_high_tier_does_not_use_override() {
    let provider = Arc::new(ScriptedProvider::always_text(NARRATIVE, 1));
    let report = engine(&provider)
        .assess(&reference_patient(), UseCase::RiskAssessment)
        .await;

    assert!(!report.metadata.emergency_override);
    assert!(!report.requires_emergency_escalation);
    assert_eq!(provider.models_called(), vec!["claude-3-5-sonnet-20241022"]);
}

// ============================================================================
// Degradation and reconciliation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unreachable_provider_returns_deterministic_report() {
    let provider = Arc::new(ScriptedProvider::new((0..4).map(|_| {
        ScriptedReply::Respond(Err(ProviderError::Network("connection refused".into())))
    })));
    let report = engine(&provider)
        .assess(&reference_patient(), UseCase::RiskAssessment)
        .await;

    assert_eq!(report.risk_score, 45.0);
    assert_eq!(report.risk_level, RiskTier::High);
    assert_eq!(report.contributing_factors.len(), 3);
    assert!(report.narrative_unavailable);
    assert!(report
        .narrative_error
        .as_deref()
        .is_some_and(|e| !e.is_empty()));
    assert!(report.metadata.model_used.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_model_risk_level_is_advisory_only() {
    let provider = Arc::new(ScriptedProvider::always_text(NARRATIVE, 1));
    let report = engine(&provider)
        .assess(&reference_patient(), UseCase::RiskAssessment)
        .await;

    assert_eq!(report.risk_level, RiskTier::High);
    assert_eq!(report.advisory_risk_level, Some(RiskTier::Low));
    assert_eq!(
        report.metadata.narrative_recovery,
        Some(NarrativeRecovery::Strict)
    );
}

#[tokio::test(start_paused = true)]
async fn test_prose_narrative_keeps_raw_payload() {
    let provider = Arc::new(ScriptedProvider::new([ScriptedReply::Respond(Ok(
        ProviderResponse::Text("I cannot produce JSON today.".into()),
    ))]));
    let report = engine(&provider)
        .assess(&reference_patient(), UseCase::RiskAssessment)
        .await;

    assert!(report.narrative_unavailable);
    assert_eq!(
        report.raw_narrative.as_deref(),
        Some("I cannot produce JSON today.")
    );
    assert_eq!(report.risk_level, RiskTier::High);
    assert_eq!(report.metadata.attempt_count, 1);
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_engine_from_config_file_uses_point_based_policy() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(
        br#"
[retry]
max_retries = 1
initial_delay_ms = 10
max_delay_ms = 10

[scoring]
policy = "point_based"
"#,
    )
    .expect("write config");

    let config = config::load_from_file(file.path()).expect("config loads");
    let provider: Arc<dyn ModelProvider> =
        Arc::new(ScriptedProvider::always_text(NARRATIVE, 1));
    let engine = RiskAssessmentEngine::from_config(&config, provider).expect("engine builds");

    let report = engine
        .assess(&reference_patient(), UseCase::RiskAssessment)
        .await;
    assert_eq!(report.metadata.scoring_policy, ScoringPolicy::PointBased);
    assert!((0.0..=100.0).contains(&report.risk_score));
}

#[test]
fn test_inconsistent_routes_fail_at_construction() {
    let mut config = EngineConfig::default();
    config.models.emergency_override_model = "missing-model".into();
    let result = RiskAssessmentEngine::from_config(&config, Arc::new(ScriptedProvider::new([])));
    assert!(matches!(result, Err(EngineError::Config(_))));
}

// ============================================================================
// Output shape
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_report_serialises_with_camel_case_keys() {
    let provider = Arc::new(ScriptedProvider::always_text(NARRATIVE, 1));
    let report = engine(&provider)
        .assess_json(
            &json!({"vitals": {"bloodPressure": "150/95", "bmi": 17.0}, "location": "rural"}),
            UseCase::RiskAssessment,
        )
        .await
        .expect("valid payload");

    let value = serde_json::to_value(&report).expect("report serialises");
    assert_eq!(value["riskScore"], 45.0);
    assert_eq!(value["riskLevel"], "high");
    assert_eq!(value["requiresEmergencyEscalation"], false);
    assert_eq!(value["narrativeUnavailable"], false);
    assert_eq!(value["warningSystem"]["redFlags"][0], "Severe headache");
    assert_eq!(value["metadata"]["attemptCount"], 1);
    assert!(value["metadata"]["timestamp"].is_string());
}

#[test]
fn test_shipped_config_file_matches_defaults() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("risk-engine.toml");
    let loaded = config::load_from_file(&path).expect("shipped config loads");
    assert_eq!(loaded, EngineConfig::default());
}
