//! # Stage: Assessment Engine
//!
//! ## Responsibility
//! Run one patient through the whole flow: deterministic scoring, model
//! selection, prompt rendering, the invocation gateway and result assembly.
//!
//! ## Guarantees
//! - [`RiskAssessmentEngine::assess`] always returns a [`RiskReport`] with
//!   the deterministic score, whatever happens on the AI path
//! - The deterministic tier is never replaced by the model's opinion
//! - Misconfiguration fails at construction, not on the first request
//!
//! ## NOT Responsible For
//! - Retry, timeout and rate-limit policy (that belongs to `gateway`)
//! - Narrative parsing (that belongs to `report`)

use crate::assessment::PatientAssessmentInput;
use crate::config::EngineConfig;
use crate::gateway::{InvocationGateway, InvocationHandle, InvocationRequest};
use crate::metrics;
use crate::models::UseCase;
use crate::prompt;
use crate::provider::ModelProvider;
use crate::report::{ResultAssembler, RiskReport};
use crate::resilience::{Clock, RateLimiter, TokioClock};
use crate::scoring::{RiskScore, RiskScorer};
use crate::EngineError;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, info_span};

/// Facade over scorer, gateway and assembler.
///
/// Cloning is cheap; clones share the gateway (and so the rate limiter).
#[derive(Debug, Clone)]
pub struct RiskAssessmentEngine {
    scorer: RiskScorer,
    gateway: InvocationGateway,
    assembler: ResultAssembler,
}

/// An assessment whose narrative is still being produced.
///
/// The deterministic score is available immediately.
#[derive(Debug)]
pub struct PendingAssessment {
    score: RiskScore,
    invocation: Result<InvocationHandle, String>,
    assembler: ResultAssembler,
}

impl PendingAssessment {
    /// The deterministic score.
    pub fn score(&self) -> &RiskScore {
        &self.score
    }

    /// Cancel the narrative request. Returns `false` if no request was made.
    pub fn cancel(&self) -> bool {
        match &self.invocation {
            Ok(handle) => {
                handle.cancel();
                true
            }
            Err(_) => false,
        }
    }

    /// Wait for the narrative and build the report.
    pub async fn report(self) -> RiskReport {
        match self.invocation {
            Ok(handle) => {
                let result = handle.outcome().await;
                self.assembler.assemble(&self.score, &result)
            }
            Err(reason) => RiskReport::degraded(&self.score, reason),
        }
    }
}

impl RiskAssessmentEngine {
    /// Assemble an engine from parts.
    pub fn new(scorer: RiskScorer, gateway: InvocationGateway) -> Self {
        Self {
            scorer,
            gateway,
            assembler: ResultAssembler::new(),
        }
    }

    /// Build an engine from validated configuration on the tokio clock.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if `config` fails validation,
    /// [`EngineError::Registry`] if the model routes are inconsistent.
    pub fn from_config(
        config: &EngineConfig,
        provider: Arc<dyn ModelProvider>,
    ) -> Result<Self, EngineError> {
        Self::from_config_with_clock(config, provider, Arc::new(TokioClock))
    }

    /// Like [`from_config`](Self::from_config) with an injected clock.
    ///
    /// # Errors
    ///
    /// See [`from_config`](Self::from_config).
    pub fn from_config_with_clock(
        config: &EngineConfig,
        provider: Arc<dyn ModelProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        crate::config::validate(config).map_err(|errors| {
            crate::config::ConfigError::Validation(
                errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        })?;

        let catalog = config
            .build_catalog()
            .map_err(|e| EngineError::Other(format!("risk factor catalog: {e}")))?;
        let registry = config.build_registry()?;
        let limiter = RateLimiter::with_clock(config.rate_limit_config(), Arc::clone(&clock));
        let gateway = InvocationGateway::with_clock(
            provider,
            limiter,
            Arc::new(registry),
            config.gateway_settings(),
            clock,
        );

        info!(
            policy = config.scoring.policy.as_str(),
            factors = catalog.factors().len(),
            burst_limit = config.rate_limit.burst_limit,
            max_retries = config.retry.max_retries,
            "risk engine configured"
        );
        Ok(Self::new(
            RiskScorer::new(Arc::new(catalog), config.scoring.policy),
            gateway,
        ))
    }

    /// The scorer.
    pub fn scorer(&self) -> &RiskScorer {
        &self.scorer
    }

    /// The invocation gateway.
    pub fn gateway(&self) -> &InvocationGateway {
        &self.gateway
    }

    /// Deterministic score only; never touches the AI path.
    pub fn score(&self, input: &PatientAssessmentInput) -> RiskScore {
        let score = self.scorer.score(input);
        metrics::inc_assessment(score.tier().as_str());
        score
    }

    /// Full assessment: deterministic score plus model narrative.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub async fn assess(&self, input: &PatientAssessmentInput, use_case: UseCase) -> RiskReport {
        self.submit(input, use_case).report().await
    }

    /// Validate a JSON payload, then [`assess`](Self::assess) it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if the payload is structurally
    /// invalid. AI-path failures never produce an error here.
    pub async fn assess_json(
        &self,
        payload: &Value,
        use_case: UseCase,
    ) -> Result<RiskReport, EngineError> {
        let input = PatientAssessmentInput::from_json(payload)?;
        Ok(self.assess(&input, use_case).await)
    }

    /// Start an assessment whose narrative runs on its own task.
    pub fn submit(&self, input: &PatientAssessmentInput, use_case: UseCase) -> PendingAssessment {
        let score = self.score(input);
        let span = info_span!(
            "assessment",
            use_case = %use_case,
            tier = %score.tier(),
            score = score.value(),
        );
        let _entered = span.enter();

        let request = InvocationRequest::new(use_case, String::new(), score.tier());
        let selection = self.gateway.selection_for(&request);
        let invocation = match prompt::build_prompt(input, &score, &selection) {
            Ok(text) => {
                debug!(prompt_tokens = prompt::estimate_tokens(&text), "prompt rendered");
                let request = InvocationRequest {
                    payload: text,
                    ..request
                };
                Ok(self.gateway.submit(request))
            }
            Err(e) => Err(e.to_string()),
        };

        PendingAssessment {
            score,
            invocation,
            assembler: self.assembler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InvocationError;
    use crate::provider::{ProviderError, ProviderResponse, ScriptedProvider, ScriptedReply};
    use crate::scoring::RiskTier;
    use serde_json::json;
    use std::time::Duration;

    const NARRATIVE: &str = r#"{
        "riskAssessment": {"riskLevel": "medium", "summary": "Elevated blood pressure."},
        "recommendations": {"immediate": ["Recheck BP"], "shortTerm": [], "longTerm": []},
        "warningSystem": {"redFlags": ["Severe headache"], "yellowFlags": []},
        "followUpSchedule": ["Week 30 visit"],
        "metadata": {}
    }"#;

    fn high_risk_input() -> PatientAssessmentInput {
        let mut input = PatientAssessmentInput::default();
        input.vitals.blood_pressure = Some("150/95".into());
        input.vitals.bmi = Some(17.0);
        input.location = Some("rural".into());
        input
    }

    fn engine_with(provider: ScriptedProvider) -> RiskAssessmentEngine {
        let mut config = EngineConfig::default();
        config.retry.initial_delay_ms = 10;
        config.retry.max_delay_ms = 40;
        RiskAssessmentEngine::from_config(&config, Arc::new(provider))
            .expect("test: default config is valid")
    }

    #[tokio::test(start_paused = true)]
    async fn test_assess_merges_narrative_with_deterministic_score() {
        let engine = engine_with(ScriptedProvider::always_text(NARRATIVE, 1));
        let report = engine
            .assess(&high_risk_input(), UseCase::RiskAssessment)
            .await;

        assert_eq!(report.risk_score, 45.0);
        assert_eq!(report.risk_level, RiskTier::High);
        assert_eq!(report.advisory_risk_level, Some(RiskTier::Medium));
        assert!(!report.narrative_unavailable);
        assert_eq!(report.warning_system.red_flags, vec!["Severe headache"]);
        assert_eq!(report.metadata.attempt_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_assess_degrades_when_provider_unreachable() {
        let provider = ScriptedProvider::new(
            (0..4).map(|_| ScriptedReply::Respond(Err(ProviderError::Network("refused".into())))),
        );
        let engine = engine_with(provider);
        let report = engine
            .assess(&high_risk_input(), UseCase::RiskAssessment)
            .await;

        assert_eq!(report.risk_score, 45.0);
        assert!(report.narrative_unavailable);
        assert!(report.narrative_error.is_some());
        assert_eq!(report.metadata.attempt_count, 4);
        assert!(report.recommendations.immediate.is_empty());
    }

    #[tokio::test]
    async fn test_assess_json_rejects_invalid_payload() {
        let engine = engine_with(ScriptedProvider::always_text(NARRATIVE, 1));
        let result = engine
            .assess_json(&json!(["not", "an", "object"]), UseCase::RiskAssessment)
            .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_assess_json_accepts_valid_payload() {
        let engine = engine_with(ScriptedProvider::always_text(NARRATIVE, 1));
        let report = engine
            .assess_json(
                &json!({"vitals": {"bloodPressure": "150/95", "bmi": 17.0}, "location": "rural"}),
                UseCase::RiskAssessment,
            )
            .await
            .expect("test: valid payload");
        assert_eq!(report.risk_level, RiskTier::High);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_in_flight_returns_degraded_report() {
        let engine = engine_with(ScriptedProvider::new([ScriptedReply::Hang]));
        let pending = engine.submit(&high_risk_input(), UseCase::RiskAssessment);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(pending.cancel());

        let report = pending.report().await;
        assert!(report.narrative_unavailable);
        assert_eq!(
            report.narrative_error.as_deref(),
            Some(InvocationError::Cancelled.to_string().as_str())
        );
        assert_eq!(report.risk_score, 45.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_json_response_payload_is_accepted() {
        let value: Value = serde_json::from_str(NARRATIVE).expect("test: fixture parses");
        let provider = ScriptedProvider::new([ScriptedReply::Respond(Ok(ProviderResponse::Json(
            value,
        )))]);
        let report = engine_with(provider)
            .assess(&high_risk_input(), UseCase::FollowUpPlanning)
            .await;
        assert_eq!(report.follow_up_schedule, vec!["Week 30 visit"]);
    }

    #[test]
    fn test_invalid_config_fails_at_construction() {
        let mut config = EngineConfig::default();
        config.rate_limit.burst_limit = 0;
        let result =
            RiskAssessmentEngine::from_config(&config, Arc::new(ScriptedProvider::new([])));
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_score_never_calls_provider() {
        let provider = Arc::new(ScriptedProvider::new([]));
        let engine = RiskAssessmentEngine::from_config(
            &EngineConfig::default(),
            Arc::clone(&provider) as Arc<dyn ModelProvider>,
        )
        .expect("test: default config");
        let score = engine.score(&high_risk_input());
        assert_eq!(score.value(), 45.0);
        assert!(provider.calls().is_empty());
    }
}
