//! # Stage: Result Assembly
//!
//! ## Responsibility
//! Turn the model's raw output into a [`NarrativeReport`] and merge it with
//! the deterministic [`RiskScore`] into the [`RiskReport`] handed back to the
//! caller.
//!
//! ## Guarantees
//! - The deterministic score and tier are authoritative; the model's own
//!   risk level only ever lands in `advisory_risk_level`
//! - `requires_emergency_escalation` depends only on the deterministic tier
//! - A report is always produced: failures set `narrative_unavailable`
//!
//! ## NOT Responsible For
//! - Calling the model (that belongs to `gateway`)
//! - Rendering the report for humans

use crate::gateway::{InvocationResult, InvocationStatus};
use crate::metrics;
use crate::provider::ProviderResponse;
use crate::scoring::{FactorContribution, RiskScore, RiskTier, ScoringPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

// ── Narrative schema ───────────────────────────────────────────────────────

/// Model's view of the overall risk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeRiskAssessment {
    /// Risk level claimed by the model (advisory only).
    #[serde(default, alias = "level")]
    pub risk_level: Option<String>,
    /// Free-text summary.
    #[serde(default)]
    pub summary: Option<String>,
}

/// Recommended actions by horizon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendations {
    /// Act now.
    pub immediate: Vec<String>,
    /// Within the coming weeks.
    pub short_term: Vec<String>,
    /// For the rest of the pregnancy.
    pub long_term: Vec<String>,
}

/// Warning signs to watch for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarningSystem {
    /// Signs that need emergency care.
    pub red_flags: Vec<String>,
    /// Signs that need prompt review.
    pub yellow_flags: Vec<String>,
}

/// Validated model output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeReport {
    /// Model's risk view.
    pub risk_assessment: NarrativeRiskAssessment,
    /// Recommended actions.
    pub recommendations: Recommendations,
    /// Warning signs.
    pub warning_system: WarningSystem,
    /// Follow-up visits and checks.
    pub follow_up_schedule: Vec<String>,
    /// Anything else the model attached.
    #[serde(default)]
    pub metadata: Value,
}

/// How the narrative was recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeRecovery {
    /// The payload matched the schema.
    Strict,
    /// Individual fields were salvaged from a non-conforming payload.
    Lenient,
}

/// The model output could not be turned into a narrative.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("narrative transformation failed: {reason}")]
pub struct TransformationError {
    /// The raw output, kept for audit.
    pub raw: String,
    /// What went wrong.
    pub reason: String,
}

// ── Report ─────────────────────────────────────────────────────────────────

/// Provenance of a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    /// Model that produced the narrative.
    pub model_used: Option<String>,
    /// When the report was assembled.
    pub timestamp: DateTime<Utc>,
    /// Provider calls made.
    pub attempt_count: usize,
    /// Scoring implementation that produced the score.
    pub scoring_policy: ScoringPolicy,
    /// How the narrative was recovered, if there is one.
    pub narrative_recovery: Option<NarrativeRecovery>,
    /// Invocation request id, if a model was asked.
    pub request_id: Option<Uuid>,
    /// Whether the Critical-tier model override applied.
    pub emergency_override: bool,
}

/// Final assessment returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskReport {
    /// Deterministic score in `[0, 100]`.
    pub risk_score: f64,
    /// Deterministic tier.
    pub risk_level: RiskTier,
    /// Deterministic factor breakdown.
    pub contributing_factors: Vec<FactorContribution>,
    /// Narrative recommendations (empty without a narrative).
    pub recommendations: Recommendations,
    /// Narrative warning signs (empty without a narrative).
    pub warning_system: WarningSystem,
    /// Narrative follow-up schedule (empty without a narrative).
    pub follow_up_schedule: Vec<String>,
    /// Risk level claimed by the model, never used for decisions.
    pub advisory_risk_level: Option<RiskTier>,
    /// Narrative summary.
    pub narrative_summary: Option<String>,
    /// `true` iff the deterministic tier is Critical.
    pub requires_emergency_escalation: bool,
    /// `true` when no narrative could be produced.
    pub narrative_unavailable: bool,
    /// Why the narrative is missing.
    pub narrative_error: Option<String>,
    /// Unparseable model output, kept for audit.
    pub raw_narrative: Option<String>,
    /// Provenance.
    pub metadata: ReportMetadata,
}

impl RiskReport {
    /// Report carrying only the deterministic score.
    pub fn degraded(score: &RiskScore, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        metrics::inc_narrative_unavailable();
        warn!(tier = %score.tier(), reason = %reason, "returning deterministic score without narrative");
        Self {
            narrative_unavailable: true,
            narrative_error: Some(reason),
            ..Self::base(score)
        }
    }

    fn base(score: &RiskScore) -> Self {
        Self {
            risk_score: score.value(),
            risk_level: score.tier(),
            contributing_factors: score.contributing_factors().to_vec(),
            recommendations: Recommendations::default(),
            warning_system: WarningSystem::default(),
            follow_up_schedule: Vec::new(),
            advisory_risk_level: None,
            narrative_summary: None,
            requires_emergency_escalation: score.requires_emergency_escalation(),
            narrative_unavailable: false,
            narrative_error: None,
            raw_narrative: None,
            metadata: ReportMetadata {
                model_used: None,
                timestamp: Utc::now(),
                attempt_count: 0,
                scoring_policy: score.policy(),
                narrative_recovery: None,
                request_id: None,
                emergency_override: false,
            },
        }
    }

    fn with_invocation(mut self, invocation: &InvocationResult) -> Self {
        self.metadata.model_used = invocation.model_used.clone();
        self.metadata.attempt_count = invocation.attempt_count();
        self.metadata.request_id = Some(invocation.request_id);
        self.metadata.emergency_override = invocation.emergency_override;
        self
    }
}

// ── Assembler ──────────────────────────────────────────────────────────────

/// Validates model output and merges it with the deterministic score.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAssembler;

impl ResultAssembler {
    /// New assembler.
    pub fn new() -> Self {
        Self
    }

    /// Parse a provider response into a narrative.
    ///
    /// Tries, in order: the payload as JSON, JSON inside a code fence, the
    /// span from the first `{` to the last `}`. A value that does not match
    /// the schema is mined for any recognised field.
    ///
    /// # Errors
    ///
    /// Returns [`TransformationError`] (carrying the raw payload) when no
    /// JSON object is found or none of the recognised fields are present.
    pub fn parse(
        &self,
        response: &ProviderResponse,
    ) -> Result<(NarrativeReport, NarrativeRecovery), TransformationError> {
        let raw = response.as_text();
        let value = match response {
            ProviderResponse::Json(value) => Some(value.clone()),
            ProviderResponse::Text(text) => extract_json(text),
        };
        let Some(value) = value else {
            return Err(TransformationError {
                raw,
                reason: "no JSON object found in model output".to_string(),
            });
        };

        if let Ok(report) = serde_json::from_value::<NarrativeReport>(value.clone()) {
            return Ok((report, NarrativeRecovery::Strict));
        }
        debug!("narrative failed strict schema, trying lenient extraction");

        match lenient(&value) {
            Some(report) => Ok((report, NarrativeRecovery::Lenient)),
            None => Err(TransformationError {
                raw,
                reason: "model output has none of the expected report fields".to_string(),
            }),
        }
    }

    /// Build the final report from the deterministic score and the
    /// invocation result.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn assemble(&self, score: &RiskScore, invocation: &InvocationResult) -> RiskReport {
        let response = match (&invocation.status, &invocation.output) {
            (InvocationStatus::Success, Ok(response)) => response,
            (_, Err(error)) => {
                return RiskReport::degraded(score, error.to_string()).with_invocation(invocation)
            }
            (InvocationStatus::FatalFailure, Ok(_)) => {
                return RiskReport::degraded(score, "invocation failed").with_invocation(invocation)
            }
        };

        match self.parse(response) {
            Ok((narrative, recovery)) => {
                let advisory = narrative
                    .risk_assessment
                    .risk_level
                    .as_deref()
                    .and_then(parse_tier);
                if let Some(advisory) = advisory {
                    if advisory != score.tier() {
                        debug!(
                            deterministic = %score.tier(),
                            advisory = %advisory,
                            "model risk level disagrees with deterministic tier"
                        );
                    }
                }

                let mut report = RiskReport::base(score).with_invocation(invocation);
                report.recommendations = narrative.recommendations;
                report.warning_system = narrative.warning_system;
                report.follow_up_schedule = narrative.follow_up_schedule;
                report.advisory_risk_level = advisory;
                report.narrative_summary = narrative.risk_assessment.summary;
                report.metadata.narrative_recovery = Some(recovery);
                report
            }
            Err(error) => {
                let mut report =
                    RiskReport::degraded(score, error.to_string()).with_invocation(invocation);
                report.raw_narrative = Some(error.raw);
                report
            }
        }
    }
}

// ── Parsing helpers ────────────────────────────────────────────────────────

fn parse_object(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text.trim())
        .ok()
        .filter(Value::is_object)
}

fn extract_json(text: &str) -> Option<Value> {
    if let Some(value) = parse_object(text) {
        return Some(value);
    }

    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let body_start = after.find('\n').map_or(0, |i| i + 1);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            if let Some(value) = parse_object(&body[..end]) {
                return Some(value);
            }
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_object(&text[start..=end])
}

fn field<'a>(object: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| object.get(*name))
}

fn item_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Object(map) => field(map, &["description", "action", "text", "item"])
            .and_then(item_text)
            .or_else(|| Some(value.to_string())),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// A list of strings from an array, a single string, or a scalar.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(item_text).collect(),
        Some(Value::String(s)) => s
            .lines()
            .map(|line| line.trim().trim_start_matches(['-', '*', '•']).trim())
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Some(other) => item_text(other).into_iter().collect(),
        None => Vec::new(),
    }
}

fn lenient(value: &Value) -> Option<NarrativeReport> {
    let root = value.as_object()?;
    let mut recognised = false;
    let mut report = NarrativeReport::default();

    if let Some(assessment) = field(root, &["riskAssessment", "risk_assessment"]) {
        recognised = true;
        match assessment {
            Value::Object(map) => {
                report.risk_assessment.risk_level = field(map, &["riskLevel", "risk_level", "level"])
                    .and_then(Value::as_str)
                    .map(str::to_string);
                report.risk_assessment.summary = field(map, &["summary", "narrative"])
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
            Value::String(summary) => report.risk_assessment.summary = Some(summary.clone()),
            _ => {}
        }
    }
    if report.risk_assessment.risk_level.is_none() {
        report.risk_assessment.risk_level = field(root, &["riskLevel", "risk_level"])
            .and_then(Value::as_str)
            .map(str::to_string);
    }

    if let Some(recs) = field(root, &["recommendations"]) {
        recognised = true;
        match recs.as_object() {
            Some(map) => {
                report.recommendations.immediate = string_list(field(map, &["immediate"]));
                report.recommendations.short_term =
                    string_list(field(map, &["shortTerm", "short_term"]));
                report.recommendations.long_term =
                    string_list(field(map, &["longTerm", "long_term"]));
            }
            None => report.recommendations.immediate = string_list(Some(recs)),
        }
    }

    if let Some(warnings) = field(root, &["warningSystem", "warning_system"]) {
        recognised = true;
        if let Some(map) = warnings.as_object() {
            report.warning_system.red_flags = string_list(field(map, &["redFlags", "red_flags"]));
            report.warning_system.yellow_flags =
                string_list(field(map, &["yellowFlags", "yellow_flags"]));
        }
    }
    for (key, target) in [
        (["redFlags", "red_flags"], &mut report.warning_system.red_flags),
        (["yellowFlags", "yellow_flags"], &mut report.warning_system.yellow_flags),
    ] {
        if target.is_empty() {
            if let Some(found) = field(root, &key) {
                recognised = true;
                *target = string_list(Some(found));
            }
        }
    }

    if let Some(schedule) = field(root, &["followUpSchedule", "follow_up_schedule"]) {
        recognised = true;
        report.follow_up_schedule = string_list(Some(schedule));
    }

    if let Some(meta) = field(root, &["metadata"]) {
        report.metadata = meta.clone();
    }

    recognised.then_some(report)
}

fn parse_tier(label: &str) -> Option<RiskTier> {
    match label.trim().to_ascii_lowercase().as_str() {
        "low" => Some(RiskTier::Low),
        "medium" | "moderate" => Some(RiskTier::Medium),
        "high" => Some(RiskTier::High),
        "critical" | "severe" | "very high" => Some(RiskTier::Critical),
        _ => None,
    }
}
