//! Catalog-driven weighted scoring.

use super::{FactorContribution, RiskScore, ScoringPolicy};
use crate::assessment::PatientAssessmentInput;
use crate::catalog::{Evaluation, RiskFactorCatalog};
use tracing::debug;

/// Score `input` against `catalog`.
///
/// For every factor whose trigger holds, adds `weight × multiplier`. Factors
/// whose inputs are missing or unparsable contribute 0. The total is clamped
/// to `[0, 100]`.
///
/// # Panics
///
/// This function never panics.
pub fn score(input: &PatientAssessmentInput, catalog: &RiskFactorCatalog) -> RiskScore {
    let mut total = 0.0_f64;
    let mut contributions = Vec::new();

    for factor in catalog.factors() {
        let evaluation = factor.trigger.evaluate(input);
        if evaluation == Evaluation::NotEvaluable {
            debug!(factor = %factor.id, "risk factor not evaluable");
            continue;
        }
        let Some(multiplier) = factor.multiplier(evaluation) else {
            continue;
        };

        let contribution = factor.weight * f64::from(multiplier);
        if contribution <= 0.0 {
            continue;
        }
        total += contribution;
        contributions.push(FactorContribution {
            factor_id: factor.id.clone(),
            category: factor.category,
            contribution,
            multiplier,
        });
    }

    RiskScore::new(
        total,
        catalog.thresholds(),
        contributions,
        ScoringPolicy::Weighted,
    )
}
