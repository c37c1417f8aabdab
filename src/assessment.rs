//! Patient assessment input.
//!
//! ## Responsibility
//! Define the per-request [`PatientAssessmentInput`] owned by the caller and
//! reject structurally invalid payloads (wrong JSON types) before scoring.
//!
//! ## Guarantees
//! - Structural validation is the only place an assessment can fail; once a
//!   value is a `PatientAssessmentInput` it can always be scored
//! - Field-level problems that are merely unparsable (e.g. a blood-pressure
//!   string like `"high"`) are *not* rejected here; the scorer treats them as
//!   not evaluable
//!
//! ## NOT Responsible For
//! - Clinical interpretation of values (that belongs to `catalog` / `scoring`)

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors for structurally invalid assessment input.
///
/// Never retried: the caller must fix the payload.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The payload was not a JSON object.
    #[error("assessment input must be a JSON object")]
    NotAnObject,

    /// A known field carried a value of the wrong JSON type.
    #[error("field '{field}' must be {expected}, got {found}")]
    WrongType {
        /// Dot-separated field path (e.g. `vitals.heartRate`).
        field: String,
        /// Human-readable description of the accepted type.
        expected: &'static str,
        /// JSON type that was actually present.
        found: &'static str,
    },

    /// The payload had the right shape but could not be deserialized
    /// (e.g. an unknown severity label or a negative age).
    #[error("malformed assessment input: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Reported severity of a symptom.
///
/// Ordered so that `Severity::Severe > Severity::Mild`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Symptom explicitly reported as absent.
    #[default]
    None,
    /// Present but not limiting.
    Mild,
    /// Present and noticeable.
    Moderate,
    /// Present and severe.
    Severe,
}

impl Severity {
    /// Stable lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Mild => "mild",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
        }
    }
}

/// Vital signs as captured by the intake form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Vitals {
    /// Blood pressure as a `"systolic/diastolic"` string, e.g. `"120/80"`.
    pub blood_pressure: Option<String>,
    /// Heart rate in beats per minute.
    pub heart_rate: Option<f64>,
    /// Body-mass index.
    pub bmi: Option<f64>,
    /// Body temperature in degrees Celsius.
    pub temperature: Option<f64>,
}

/// A parsed blood-pressure reading in mmHg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloodPressure {
    /// Systolic pressure.
    pub systolic: u32,
    /// Diastolic pressure.
    pub diastolic: u32,
}

impl BloodPressure {
    /// Parse a `"<int>/<int>"` reading.
    ///
    /// Returns `None` for anything else: the caller treats the factor as not
    /// evaluable instead of failing the assessment.
    ///
    /// # Example
    ///
    /// ```rust
    /// use maternal_risk_engine::assessment::BloodPressure;
    /// let bp = BloodPressure::parse("150/95").unwrap();
    /// assert_eq!((bp.systolic, bp.diastolic), (150, 95));
    /// assert!(BloodPressure::parse("150/high").is_none());
    /// ```
    pub fn parse(raw: &str) -> Option<Self> {
        let (systolic, diastolic) = raw.trim().split_once('/')?;
        let systolic = systolic.trim().parse().ok()?;
        let diastolic = diastolic.trim().parse().ok()?;
        Some(Self {
            systolic,
            diastolic,
        })
    }
}

impl Vitals {
    /// Parsed blood pressure, or `None` if absent or unparsable.
    pub fn blood_pressure(&self) -> Option<BloodPressure> {
        self.blood_pressure.as_deref().and_then(BloodPressure::parse)
    }
}

/// Obstetric and medical history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PatientHistory {
    /// Complications in previous pregnancies (e.g. `"preeclampsia"`).
    pub previous_complications: Vec<String>,
    /// Chronic conditions (e.g. `"diabetes"`, `"hypertension"`).
    pub chronic_conditions: Vec<String>,
    /// Number of previous pregnancies.
    pub previous_pregnancies: Option<u32>,
}

/// Everything the caller knows about the patient for one assessment.
///
/// Created per request and owned by the caller. Every field is optional so
/// partial intake forms can still be scored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PatientAssessmentInput {
    /// Age in years.
    pub age: Option<u32>,
    /// Vital signs.
    pub vitals: Vitals,
    /// Symptom name → reported severity.
    pub symptoms: BTreeMap<String, Severity>,
    /// Free-form location label (e.g. `"rural"`, `"urban"`).
    pub location: Option<String>,
    /// Whether the patient has regular access to healthcare.
    pub access_to_healthcare: Option<bool>,
    /// Current gestational week.
    pub pregnancy_week: Option<u32>,
    /// Medical and obstetric history.
    pub history: PatientHistory,
}

impl PatientAssessmentInput {
    /// Build an input from an untyped JSON payload.
    ///
    /// Known fields are type-checked first so the error names the offending
    /// field; unknown fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the payload is not an object, a known
    /// field has the wrong JSON type, or deserialization fails.
    pub fn from_json(value: &Value) -> Result<Self, ValidationError> {
        let obj = value.as_object().ok_or(ValidationError::NotAnObject)?;

        expect_kind(obj.get("age"), "age", JsonKind::Number)?;
        expect_kind(obj.get("pregnancyWeek"), "pregnancyWeek", JsonKind::Number)?;
        expect_kind(obj.get("location"), "location", JsonKind::String)?;
        expect_kind(
            obj.get("accessToHealthcare"),
            "accessToHealthcare",
            JsonKind::Bool,
        )?;
        expect_kind(obj.get("symptoms"), "symptoms", JsonKind::Object)?;
        expect_kind(obj.get("history"), "history", JsonKind::Object)?;
        expect_kind(obj.get("vitals"), "vitals", JsonKind::Object)?;

        if let Some(vitals) = obj.get("vitals").and_then(Value::as_object) {
            expect_kind(
                vitals.get("bloodPressure"),
                "vitals.bloodPressure",
                JsonKind::String,
            )?;
            for key in ["heartRate", "bmi", "temperature"] {
                expect_kind(vitals.get(key), &format!("vitals.{key}"), JsonKind::Number)?;
            }
        }

        let mut cleaned = value.clone();
        strip_nulls(&mut cleaned);
        Ok(serde_json::from_value(cleaned)?)
    }

    /// Number of the named symptoms reported at or above `min`.
    ///
    /// Names are compared case-insensitively.
    pub fn symptoms_at_least(&self, names: &[String], min: Severity) -> usize {
        self.symptoms
            .iter()
            .filter(|(name, severity)| {
                **severity >= min && names.iter().any(|n| n.eq_ignore_ascii_case(name))
            })
            .count()
    }
}

#[derive(Debug, Clone, Copy)]
enum JsonKind {
    Number,
    String,
    Bool,
    Object,
}

impl JsonKind {
    fn describe(self) -> &'static str {
        match self {
            Self::Number => "a number",
            Self::String => "a string",
            Self::Bool => "a boolean",
            Self::Object => "an object",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Bool => value.is_boolean(),
            Self::Object => value.is_object(),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Drop `null` members so they fall back to the field defaults.
fn strip_nulls(value: &mut Value) {
    if let Value::Object(map) = value {
        map.retain(|_, v| !v.is_null());
        map.values_mut().for_each(strip_nulls);
    }
}

/// `null` and absent fields are always accepted.
fn expect_kind(value: Option<&Value>, field: &str, kind: JsonKind) -> Result<(), ValidationError> {
    match value {
        None | Some(Value::Null) => Ok(()),
        Some(v) if kind.accepts(v) => Ok(()),
        Some(v) => Err(ValidationError::WrongType {
            field: field.to_string(),
            expected: kind.describe(),
            found: json_type_name(v),
        }),
    }
}
