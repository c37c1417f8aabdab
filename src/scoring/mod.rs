//! # Stage: Deterministic Risk Scoring
//!
//! ## Responsibility
//! Turn a [`PatientAssessmentInput`] into a [`RiskScore`]: a value in
//! `[0, 100]`, a [`RiskTier`], and the contributing factors sorted by
//! contribution for explainability.
//!
//! ## Guarantees
//! - Pure: same input and catalog always produce the same score; no clock,
//!   no randomness, no I/O
//! - Bounded: the value is clamped to `[0, 100]`
//! - Total: every value maps to exactly one tier
//! - Non-failing: unparsable fields contribute nothing instead of erroring
//!
//! ## NOT Responsible For
//! - Model selection (that belongs to `models`)
//! - Narrative generation (that belongs to `gateway` / `report`)

pub mod point_based;
pub mod tier;
pub mod weighted;

pub use tier::{clamp_score, RiskTier, TierThresholds, MAX_SCORE};

use crate::assessment::PatientAssessmentInput;
use crate::catalog::{FactorCategory, RiskFactorCatalog};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which scoring implementation to run.
///
/// `Weighted` is canonical; `PointBased` keeps the older heuristic
/// available as a reference so both can be compared on the same input.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ScoringPolicy {
    /// Catalog-driven weighted factors.
    #[default]
    Weighted,
    /// Fixed point table normalised to `[0, 100]`.
    PointBased,
}

impl ScoringPolicy {
    /// Stable lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weighted => "weighted",
            Self::PointBased => "point_based",
        }
    }
}

/// One factor's share of a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorContribution {
    /// Catalog id of the factor.
    pub factor_id: String,
    /// Factor grouping.
    pub category: FactorCategory,
    /// Points contributed (weight × severity multiplier).
    pub contribution: f64,
    /// Severity multiplier applied.
    pub multiplier: u32,
}

/// Deterministic risk score. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskScore {
    value: f64,
    tier: RiskTier,
    contributing_factors: Vec<FactorContribution>,
    policy: ScoringPolicy,
}

impl RiskScore {
    /// Assemble a score, sorting contributions descending (ties by id).
    pub(crate) fn new(
        value: f64,
        thresholds: &TierThresholds,
        mut contributing_factors: Vec<FactorContribution>,
        policy: ScoringPolicy,
    ) -> Self {
        let value = clamp_score(value);
        contributing_factors.sort_by(|a, b| {
            b.contribution
                .total_cmp(&a.contribution)
                .then_with(|| a.factor_id.cmp(&b.factor_id))
        });
        Self {
            value,
            tier: thresholds.tier_for(value),
            contributing_factors,
            policy,
        }
    }

    /// Score in `[0, 100]`.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Tier derived from the value.
    pub fn tier(&self) -> RiskTier {
        self.tier
    }

    /// Contributing factors, highest contribution first.
    pub fn contributing_factors(&self) -> &[FactorContribution] {
        &self.contributing_factors
    }

    /// Policy that produced this score.
    pub fn policy(&self) -> ScoringPolicy {
        self.policy
    }

    /// `true` when downstream emergency workflows must be triggered.
    pub fn requires_emergency_escalation(&self) -> bool {
        self.tier == RiskTier::Critical
    }

    /// Ids of the contributing factors, in order.
    pub fn factor_ids(&self) -> Vec<&str> {
        self.contributing_factors
            .iter()
            .map(|c| c.factor_id.as_str())
            .collect()
    }
}

/// Scorer bound to one catalog and one policy.
///
/// Cheap to clone; the catalog is shared.
#[derive(Debug, Clone)]
pub struct RiskScorer {
    catalog: Arc<RiskFactorCatalog>,
    policy: ScoringPolicy,
}

impl RiskScorer {
    /// Create a scorer.
    pub fn new(catalog: Arc<RiskFactorCatalog>, policy: ScoringPolicy) -> Self {
        Self { catalog, policy }
    }

    /// Weighted scorer over the standard catalog.
    pub fn standard() -> Self {
        Self::new(Arc::new(RiskFactorCatalog::standard()), ScoringPolicy::Weighted)
    }

    /// Score one input under the configured policy.
    ///
    /// # Panics
    ///
    /// This function never panics.
    ///
    /// # Example
    ///
    /// ```rust
    /// use maternal_risk_engine::{PatientAssessmentInput, RiskScorer, RiskTier};
    ///
    /// let mut input = PatientAssessmentInput::default();
    /// input.vitals.blood_pressure = Some("150/95".into());
    /// input.vitals.bmi = Some(17.0);
    /// input.location = Some("rural".into());
    ///
    /// let score = RiskScorer::standard().score(&input);
    /// assert_eq!(score.value(), 45.0);
    /// assert_eq!(score.tier(), RiskTier::High);
    /// ```
    pub fn score(&self, input: &PatientAssessmentInput) -> RiskScore {
        match self.policy {
            ScoringPolicy::Weighted => weighted::score(input, &self.catalog),
            ScoringPolicy::PointBased => point_based::score(input, self.catalog.thresholds()),
        }
    }

    /// The catalog in use.
    pub fn catalog(&self) -> &RiskFactorCatalog {
        &self.catalog
    }

    /// The policy in use.
    pub fn policy(&self) -> ScoringPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contribution(id: &str, value: f64) -> FactorContribution {
        FactorContribution {
            factor_id: id.to_string(),
            category: FactorCategory::Medical,
            contribution: value,
            multiplier: 1,
        }
    }

    #[test]
    fn test_new_sorts_descending_with_id_tiebreak() {
        let score = RiskScore::new(
            30.0,
            &TierThresholds::default(),
            vec![
                contribution("b", 10.0),
                contribution("c", 15.0),
                contribution("a", 10.0),
            ],
            ScoringPolicy::Weighted,
        );
        assert_eq!(score.factor_ids(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_new_clamps_value_and_derives_tier() {
        let score = RiskScore::new(
            180.0,
            &TierThresholds::default(),
            Vec::new(),
            ScoringPolicy::Weighted,
        );
        assert_eq!(score.value(), 100.0);
        assert_eq!(score.tier(), RiskTier::Critical);
        assert!(score.requires_emergency_escalation());
    }

    #[test]
    fn test_policy_switch_changes_implementation() {
        let catalog = Arc::new(RiskFactorCatalog::standard());
        let mut input = PatientAssessmentInput::default();
        input.age = Some(40);

        let weighted = RiskScorer::new(catalog.clone(), ScoringPolicy::Weighted).score(&input);
        let points = RiskScorer::new(catalog, ScoringPolicy::PointBased).score(&input);

        assert_eq!(weighted.policy(), ScoringPolicy::Weighted);
        assert_eq!(points.policy(), ScoringPolicy::PointBased);
        assert_eq!(weighted.value(), 10.0);
        assert_eq!(points.value(), 8.0);
    }

    #[test]
    fn test_scoring_policy_serializes_snake_case() {
        let json = serde_json::to_string(&ScoringPolicy::PointBased).expect("test: serialize");
        assert_eq!(json, "\"point_based\"");
    }

    #[test]
    fn test_risk_score_serializes_camel_case() {
        let score = RiskScorer::standard().score(&PatientAssessmentInput::default());
        let json = serde_json::to_value(&score).expect("test: serialize");
        assert!(json.get("contributingFactors").is_some());
        assert_eq!(json["tier"], "low");
    }

    #[test]
    fn test_risk_tier_wire_format_is_lowercase() {
        for (tier, wire) in [
            (RiskTier::Low, "\"low\""),
            (RiskTier::Medium, "\"medium\""),
            (RiskTier::High, "\"high\""),
            (RiskTier::Critical, "\"critical\""),
        ] {
            assert_eq!(serde_json::to_string(&tier).expect("test: serialize"), wire);
            let back: RiskTier = serde_json::from_str(wire).expect("test: deserialize");
            assert_eq!(back, tier);
        }
    }
}
