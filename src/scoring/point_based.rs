//! Point-table heuristic scoring.
//!
//! A fixed table of integer points per finding, normalised to `[0, 100]`
//! against [`MAX_POINTS`]. Kept alongside the weighted scorer as a reference
//! policy; it ignores the catalog's factor list but shares its tier bounds.

use super::{FactorContribution, RiskScore, ScoringPolicy, TierThresholds};
use crate::assessment::{PatientAssessmentInput, Severity};
use crate::catalog::FactorCategory;

/// Points that map to a score of 100.
pub const MAX_POINTS: f64 = 25.0;

/// Cap on points earned from symptoms.
const SYMPTOM_POINT_CAP: u32 = 6;

fn points_for_blood_pressure(input: &PatientAssessmentInput) -> u32 {
    match input.vitals.blood_pressure() {
        Some(bp) if bp.systolic >= 160 || bp.diastolic >= 110 => 5,
        Some(bp) if bp.systolic >= 140 || bp.diastolic >= 90 => 3,
        _ => 0,
    }
}

fn points_for_symptoms(input: &PatientAssessmentInput) -> u32 {
    let raw: u32 = input
        .symptoms
        .values()
        .map(|severity| match severity {
            Severity::Severe => 2,
            Severity::Moderate => 1,
            Severity::Mild | Severity::None => 0,
        })
        .sum();
    raw.min(SYMPTOM_POINT_CAP)
}

/// Score `input` with the point table.
///
/// # Panics
///
/// This function never panics.
pub fn score(input: &PatientAssessmentInput, thresholds: &TierThresholds) -> RiskScore {
    use FactorCategory::{HealthcareAccess, Medical, Socioeconomic};

    let vitals = &input.vitals;
    let finite = |v: Option<f64>| v.filter(|x| x.is_finite());

    let table: [(&str, FactorCategory, u32); 9] = [
        (
            "age",
            Medical,
            match input.age {
                Some(age) if !(18..35).contains(&age) => 2,
                _ => 0,
            },
        ),
        ("blood_pressure", Medical, points_for_blood_pressure(input)),
        (
            "bmi",
            Medical,
            match finite(vitals.bmi) {
                Some(bmi) if !(18.5..30.0).contains(&bmi) => 2,
                _ => 0,
            },
        ),
        (
            "vital_signs",
            Medical,
            u32::from(finite(vitals.heart_rate).is_some_and(|hr| hr > 100.0))
                + u32::from(finite(vitals.temperature).is_some_and(|t| t > 38.0)),
        ),
        ("symptoms", Medical, points_for_symptoms(input)),
        (
            "history",
            Medical,
            (if input.history.previous_complications.is_empty() {
                0
            } else {
                2
            }) + u32::from(!input.history.chronic_conditions.is_empty()),
        ),
        (
            "healthcare_access",
            HealthcareAccess,
            if input.access_to_healthcare == Some(false) {
                2
            } else {
                0
            },
        ),
        (
            "rural_location",
            HealthcareAccess,
            u32::from(
                input
                    .location
                    .as_deref()
                    .is_some_and(|loc| loc.trim().eq_ignore_ascii_case("rural")),
            ),
        ),
        (
            "grand_multiparity",
            Socioeconomic,
            u32::from(input.history.previous_pregnancies.is_some_and(|n| n >= 5)),
        ),
    ];

    let mut total_points = 0_u32;
    let mut contributions = Vec::new();
    for (id, category, points) in table {
        if points == 0 {
            continue;
        }
        total_points += points;
        contributions.push(FactorContribution {
            factor_id: id.to_string(),
            category,
            contribution: f64::from(points) * 100.0 / MAX_POINTS,
            multiplier: 1,
        });
    }

    RiskScore::new(
        f64::from(total_points) * 100.0 / MAX_POINTS,
        thresholds,
        contributions,
        ScoringPolicy::PointBased,
    )
}
