//! # Risk Factor Catalog
//!
//! ## Responsibility
//! Hold the immutable table of weighted risk factors and tier thresholds the
//! scorer evaluates. Built once at startup (from defaults or configuration)
//! and shared read-only for the process lifetime.
//!
//! ## Guarantees
//! - Immutable: no API mutates a catalog after construction
//! - Validated: duplicate ids, negative/non-finite weights and unusable tier
//!   bounds are rejected by [`RiskFactorCatalog::new`]
//! - Data-driven: triggers are plain data ([`TriggerCondition`]) so catalogs
//!   can be expressed in TOML
//!
//! ## NOT Responsible For
//! - Summing contributions or assigning tiers (that belongs to `scoring`)

use crate::assessment::{PatientAssessmentInput, Severity};
use crate::scoring::TierThresholds;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Broad grouping of a risk factor, used in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FactorCategory {
    /// Clinical findings and history.
    Medical,
    /// Social and economic circumstances.
    Socioeconomic,
    /// Distance from, or lack of, care.
    HealthcareAccess,
}

/// Condition under which a risk factor applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerCondition {
    /// Systolic strictly above `systolic` **or** diastolic strictly above
    /// `diastolic`.
    BloodPressureAbove {
        /// Systolic limit in mmHg.
        systolic: u32,
        /// Diastolic limit in mmHg.
        diastolic: u32,
    },
    /// BMI strictly below `value`.
    BmiBelow {
        /// BMI limit.
        value: f64,
    },
    /// BMI at or above `value`.
    BmiAtLeast {
        /// BMI limit.
        value: f64,
    },
    /// Age strictly below `years`.
    AgeBelow {
        /// Age limit.
        years: u32,
    },
    /// Age at or above `years`.
    AgeAtLeast {
        /// Age limit.
        years: u32,
    },
    /// Heart rate strictly above `bpm`.
    HeartRateAbove {
        /// Beats-per-minute limit.
        bpm: f64,
    },
    /// Temperature strictly above `celsius`.
    TemperatureAbove {
        /// Temperature limit.
        celsius: f64,
    },
    /// Location label equals `location` (case-insensitive).
    LocationIs {
        /// Expected location label.
        location: String,
    },
    /// Patient reports no regular access to healthcare.
    NoHealthcareAccess,
    /// At least one of `symptoms` is reported at `min_severity` or worse.
    SymptomsPresent {
        /// Symptom names to look for.
        symptoms: Vec<String>,
        /// Minimum severity that counts as present.
        min_severity: Severity,
    },
    /// History lists at least one previous complication.
    PreviousComplications,
    /// History lists at least one chronic condition.
    ChronicConditions,
    /// Gestational week at or beyond `week`.
    PregnancyWeekAtLeast {
        /// Week limit.
        week: u32,
    },
}

/// Result of evaluating one trigger against one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// The field needed by the trigger is missing or unparsable.
    NotEvaluable,
    /// The trigger does not hold.
    Absent,
    /// The trigger holds; `count` is the number of matching items
    /// (1 for non-countable triggers).
    Present {
        /// Matching item count.
        count: u32,
    },
}

impl Evaluation {
    fn from_bool(hit: bool) -> Self {
        if hit {
            Self::Present { count: 1 }
        } else {
            Self::Absent
        }
    }
}

impl TriggerCondition {
    /// Evaluate against `input`. Never fails: missing or unparsable fields
    /// yield [`Evaluation::NotEvaluable`].
    pub fn evaluate(&self, input: &PatientAssessmentInput) -> Evaluation {
        let vitals = &input.vitals;

        match self {
            Self::BloodPressureAbove {
                systolic,
                diastolic,
            } => match vitals.blood_pressure() {
                Some(bp) => {
                    Evaluation::from_bool(bp.systolic > *systolic || bp.diastolic > *diastolic)
                }
                None => Evaluation::NotEvaluable,
            },
            Self::BmiBelow { value } => numeric(vitals.bmi, |bmi| bmi < *value),
            Self::BmiAtLeast { value } => numeric(vitals.bmi, |bmi| bmi >= *value),
            Self::AgeBelow { years } => input
                .age
                .map_or(Evaluation::NotEvaluable, |age| Evaluation::from_bool(age < *years)),
            Self::AgeAtLeast { years } => input
                .age
                .map_or(Evaluation::NotEvaluable, |age| Evaluation::from_bool(age >= *years)),
            Self::HeartRateAbove { bpm } => numeric(vitals.heart_rate, |hr| hr > *bpm),
            Self::TemperatureAbove { celsius } => {
                numeric(vitals.temperature, |temp| temp > *celsius)
            }
            Self::LocationIs { location } => match input.location.as_deref() {
                Some(loc) => Evaluation::from_bool(loc.trim().eq_ignore_ascii_case(location)),
                None => Evaluation::NotEvaluable,
            },
            Self::NoHealthcareAccess => input
                .access_to_healthcare
                .map_or(Evaluation::NotEvaluable, |access| Evaluation::from_bool(!access)),
            Self::SymptomsPresent {
                symptoms,
                min_severity,
            } => {
                let count = input.symptoms_at_least(symptoms, *min_severity);
                if count == 0 {
                    Evaluation::Absent
                } else {
                    Evaluation::Present {
                        count: u32::try_from(count).unwrap_or(u32::MAX),
                    }
                }
            }
            Self::PreviousComplications => {
                Evaluation::from_bool(!input.history.previous_complications.is_empty())
            }
            Self::ChronicConditions => {
                Evaluation::from_bool(!input.history.chronic_conditions.is_empty())
            }
            Self::PregnancyWeekAtLeast { week } => input
                .pregnancy_week
                .map_or(Evaluation::NotEvaluable, |w| Evaluation::from_bool(w >= *week)),
        }
    }
}

fn numeric(value: Option<f64>, hit: impl Fn(f64) -> bool) -> Evaluation {
    match value {
        Some(v) if v.is_finite() => Evaluation::from_bool(hit(v)),
        _ => Evaluation::NotEvaluable,
    }
}

/// Graded severity: the contribution is multiplied by the number of
/// matching items, capped at `max_multiplier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Grading {
    /// Largest multiplier applied.
    pub max_multiplier: u32,
}

/// One weighted risk factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RiskFactorDefinition {
    /// Stable identifier reported in contributing factors.
    pub id: String,
    /// Grouping used in reports.
    pub category: FactorCategory,
    /// Points added when the trigger holds (before grading).
    pub weight: f64,
    /// When the factor applies.
    pub trigger: TriggerCondition,
    /// Optional severity grading; `None` means multiplier 1.
    #[serde(default)]
    pub graded: Option<Grading>,
    /// Short clinician-facing description.
    #[serde(default)]
    pub description: String,
}

impl RiskFactorDefinition {
    /// Severity multiplier for an evaluation, or `None` if the factor does
    /// not contribute.
    pub fn multiplier(&self, evaluation: Evaluation) -> Option<u32> {
        match evaluation {
            Evaluation::Present { count } => Some(match self.graded {
                Some(grading) => count.min(grading.max_multiplier),
                None => 1,
            }),
            Evaluation::Absent | Evaluation::NotEvaluable => None,
        }
    }
}

/// Errors raised while building a catalog.
#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
    /// Two factors share an id.
    #[error("duplicate risk factor id '{0}'")]
    DuplicateId(String),

    /// A weight is negative, NaN or infinite.
    #[error("risk factor '{id}' has invalid weight {weight}")]
    InvalidWeight {
        /// Offending factor.
        id: String,
        /// Offending weight.
        weight: f64,
    },

    /// Tier thresholds are unusable.
    #[error("invalid tier thresholds: {0}")]
    InvalidThresholds(String),

    /// The catalog has no factors at all.
    #[error("risk factor catalog is empty")]
    Empty,
}

/// Immutable table of weighted risk factors plus tier thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskFactorCatalog {
    factors: Vec<RiskFactorDefinition>,
    thresholds: TierThresholds,
}

impl RiskFactorCatalog {
    /// Build a catalog after validating every factor.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] for duplicate ids, invalid weights, unusable
    /// thresholds or an empty factor list.
    pub fn new(
        factors: Vec<RiskFactorDefinition>,
        thresholds: TierThresholds,
    ) -> Result<Self, CatalogError> {
        if factors.is_empty() {
            return Err(CatalogError::Empty);
        }
        thresholds.check().map_err(CatalogError::InvalidThresholds)?;

        let mut seen = HashSet::new();
        for factor in &factors {
            if !seen.insert(factor.id.as_str()) {
                return Err(CatalogError::DuplicateId(factor.id.clone()));
            }
            if !factor.weight.is_finite() || factor.weight < 0.0 {
                return Err(CatalogError::InvalidWeight {
                    id: factor.id.clone(),
                    weight: factor.weight,
                });
            }
        }

        Ok(Self {
            factors,
            thresholds,
        })
    }

    /// Factors in definition order.
    pub fn factors(&self) -> &[RiskFactorDefinition] {
        &self.factors
    }

    /// Tier thresholds.
    pub fn thresholds(&self) -> &TierThresholds {
        &self.thresholds
    }

    /// Look up a factor by id.
    pub fn get(&self, id: &str) -> Option<&RiskFactorDefinition> {
        self.factors.iter().find(|f| f.id == id)
    }

    /// The built-in antenatal catalog.
    pub fn standard() -> Self {
        Self {
            factors: standard_factors(),
            thresholds: TierThresholds::default(),
        }
    }
}

impl Default for RiskFactorCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

/// Symptoms that warrant urgent review in pregnancy.
pub const WARNING_SYMPTOMS: [&str; 7] = [
    "severe_headache",
    "headache",
    "vision_changes",
    "abdominal_pain",
    "vaginal_bleeding",
    "reduced_fetal_movement",
    "shortness_of_breath",
];

fn factor(
    id: &str,
    category: FactorCategory,
    weight: f64,
    trigger: TriggerCondition,
    description: &str,
) -> RiskFactorDefinition {
    RiskFactorDefinition {
        id: id.to_string(),
        category,
        weight,
        trigger,
        graded: None,
        description: description.to_string(),
    }
}

/// Default factor table.
pub fn standard_factors() -> Vec<RiskFactorDefinition> {
    use FactorCategory::{HealthcareAccess, Medical};

    let mut severe_symptoms = factor(
        "severe_symptoms",
        Medical,
        10.0,
        TriggerCondition::SymptomsPresent {
            symptoms: WARNING_SYMPTOMS.iter().map(|s| (*s).to_string()).collect(),
            min_severity: Severity::Severe,
        },
        "Severe warning symptoms reported",
    );
    severe_symptoms.graded = Some(Grading { max_multiplier: 3 });

    vec![
        factor(
            "high_blood_pressure",
            Medical,
            20.0,
            TriggerCondition::BloodPressureAbove {
                systolic: 140,
                diastolic: 90,
            },
            "Blood pressure above 140/90 mmHg",
        ),
        factor(
            "underweight",
            Medical,
            10.0,
            TriggerCondition::BmiBelow { value: 18.5 },
            "BMI below 18.5",
        ),
        factor(
            "obesity",
            Medical,
            10.0,
            TriggerCondition::BmiAtLeast { value: 30.0 },
            "BMI of 30 or above",
        ),
        factor(
            "advanced_maternal_age",
            Medical,
            10.0,
            TriggerCondition::AgeAtLeast { years: 35 },
            "Maternal age 35 or above",
        ),
        factor(
            "adolescent_pregnancy",
            Medical,
            10.0,
            TriggerCondition::AgeBelow { years: 18 },
            "Maternal age below 18",
        ),
        factor(
            "tachycardia",
            Medical,
            5.0,
            TriggerCondition::HeartRateAbove { bpm: 100.0 },
            "Heart rate above 100 bpm",
        ),
        factor(
            "fever",
            Medical,
            5.0,
            TriggerCondition::TemperatureAbove { celsius: 38.0 },
            "Temperature above 38 °C",
        ),
        severe_symptoms,
        factor(
            "previous_complications",
            Medical,
            10.0,
            TriggerCondition::PreviousComplications,
            "Complications in a previous pregnancy",
        ),
        factor(
            "chronic_conditions",
            Medical,
            5.0,
            TriggerCondition::ChronicConditions,
            "Pre-existing chronic condition",
        ),
        factor(
            "limited_access",
            HealthcareAccess,
            15.0,
            TriggerCondition::LocationIs {
                location: "rural".to_string(),
            },
            "Rural location with limited access to obstetric care",
        ),
        factor(
            "no_healthcare_access",
            HealthcareAccess,
            15.0,
            TriggerCondition::NoHealthcareAccess,
            "No regular access to healthcare",
        ),
    ]
}
