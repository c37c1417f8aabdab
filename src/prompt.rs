//! Narrative prompt rendering.
//!
//! The prompt carries the patient data and the deterministic score, and asks
//! for a JSON document matching [`NarrativeReport`](crate::report::NarrativeReport).

use crate::assessment::PatientAssessmentInput;
use crate::models::{Selection, UseCase};
use crate::scoring::RiskScore;
use std::fmt::Write as _;
use thiserror::Error;

/// Rough characters-per-token ratio used for budgeting.
const CHARS_PER_TOKEN: usize = 4;

/// The prompt would not fit the model's context window.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("prompt needs ~{estimated} tokens plus {reserved} for output, model '{model}' allows {limit}")]
pub struct PromptTooLarge {
    /// Estimated prompt tokens.
    pub estimated: usize,
    /// Tokens reserved for the answer.
    pub reserved: usize,
    /// Context window.
    pub limit: usize,
    /// Model the budget was checked against.
    pub model: String,
}

/// Estimated token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

const RESPONSE_SCHEMA: &str = r#"{
  "riskAssessment": {"riskLevel": "low|medium|high|critical", "summary": "string"},
  "recommendations": {"immediate": ["string"], "shortTerm": ["string"], "longTerm": ["string"]},
  "warningSystem": {"redFlags": ["string"], "yellowFlags": ["string"]},
  "followUpSchedule": ["string"],
  "metadata": {}
}"#;

fn task_for(use_case: UseCase) -> &'static str {
    match use_case {
        UseCase::RiskAssessment => {
            "Write a pregnancy risk assessment for the care team, with recommendations \
             and warning signs the patient should know."
        }
        UseCase::EmergencyTriage => {
            "This patient may need urgent care. Give short, direct triage guidance: \
             what to do now, and which signs require emergency transfer."
        }
        UseCase::FollowUpPlanning => {
            "Propose a follow-up schedule for the rest of the pregnancy, with the \
             checks to perform at each visit."
        }
    }
}

fn render_patient(input: &PatientAssessmentInput, out: &mut String) {
    let unknown = "not recorded";
    let opt = |v: Option<String>| v.unwrap_or_else(|| unknown.to_string());

    let _ = writeln!(out, "- Age: {}", opt(input.age.map(|a| a.to_string())));
    let _ = writeln!(
        out,
        "- Gestational week: {}",
        opt(input.pregnancy_week.map(|w| w.to_string()))
    );
    let _ = writeln!(
        out,
        "- Blood pressure: {}",
        opt(input.vitals.blood_pressure.clone())
    );
    let _ = writeln!(
        out,
        "- Heart rate: {}",
        opt(input.vitals.heart_rate.map(|v| format!("{v} bpm")))
    );
    let _ = writeln!(out, "- BMI: {}", opt(input.vitals.bmi.map(|v| format!("{v:.1}"))));
    let _ = writeln!(
        out,
        "- Temperature: {}",
        opt(input.vitals.temperature.map(|v| format!("{v:.1} °C")))
    );
    let _ = writeln!(out, "- Location: {}", opt(input.location.clone()));
    let _ = writeln!(
        out,
        "- Access to healthcare: {}",
        opt(input.access_to_healthcare.map(|a| if a { "yes" } else { "no" }.to_string()))
    );

    if input.symptoms.is_empty() {
        let _ = writeln!(out, "- Symptoms: none reported");
    } else {
        let symptoms: Vec<String> = input
            .symptoms
            .iter()
            .map(|(name, severity)| format!("{name} ({})", severity.as_str()))
            .collect();
        let _ = writeln!(out, "- Symptoms: {}", symptoms.join(", "));
    }

    let list = |items: &[String]| {
        if items.is_empty() {
            "none".to_string()
        } else {
            items.join(", ")
        }
    };
    let _ = writeln!(
        out,
        "- Previous complications: {}",
        list(&input.history.previous_complications)
    );
    let _ = writeln!(
        out,
        "- Chronic conditions: {}",
        list(&input.history.chronic_conditions)
    );
    let _ = writeln!(
        out,
        "- Previous pregnancies: {}",
        opt(input.history.previous_pregnancies.map(|n| n.to_string()))
    );
}

/// Render the prompt for `selection.use_case`.
///
/// # Errors
///
/// Returns [`PromptTooLarge`] if the estimated prompt plus the output budget
/// exceeds the primary model's context window.
pub fn build_prompt(
    input: &PatientAssessmentInput,
    score: &RiskScore,
    selection: &Selection,
) -> Result<String, PromptTooLarge> {
    let mut out = String::with_capacity(2048);

    let _ = writeln!(out, "You are assisting a maternal health care team.");
    let _ = writeln!(out, "{}\n", task_for(selection.use_case));

    let _ = writeln!(out, "Patient:");
    render_patient(input, &mut out);

    let _ = writeln!(
        out,
        "\nDeterministic risk score: {:.0}/100 (tier: {}).",
        score.value(),
        score.tier()
    );
    if score.contributing_factors().is_empty() {
        let _ = writeln!(out, "No catalogued risk factors were triggered.");
    } else {
        let _ = writeln!(out, "Contributing factors:");
        for factor in score.contributing_factors() {
            let _ = writeln!(
                out,
                "- {} (+{:.0})",
                factor.factor_id, factor.contribution
            );
        }
    }
    if score.requires_emergency_escalation() {
        let _ = writeln!(
            out,
            "The score is in the critical tier: lead with emergency guidance."
        );
    }

    let _ = writeln!(
        out,
        "\nThe score above is authoritative; do not recompute it. \
         Respond with a single JSON object and nothing else, using this shape:\n{RESPONSE_SCHEMA}"
    );

    let estimated = estimate_tokens(&out);
    let reserved = selection.max_tokens_for(&selection.primary) as usize;
    let limit = selection.context_window as usize;
    if estimated + reserved > limit {
        return Err(PromptTooLarge {
            estimated,
            reserved,
            limit,
            model: selection.primary.name.clone(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::Severity;
    use crate::models::{ModelProfile, ModelRegistry, ModelSelector};
    use crate::scoring::{RiskScorer, RiskTier};

    fn input() -> PatientAssessmentInput {
        let mut input = PatientAssessmentInput::default();
        input.age = Some(29);
        input.vitals.blood_pressure = Some("150/95".into());
        input.vitals.bmi = Some(17.0);
        input.location = Some("rural".into());
        input.symptoms.insert("headache".into(), Severity::Mild);
        input
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_prompt_contains_score_factors_and_schema() {
        let score = RiskScorer::standard().score(&input());
        let selection = ModelSelector::select(
            UseCase::RiskAssessment,
            score.tier(),
            &ModelRegistry::standard(),
        );
        let prompt = build_prompt(&input(), &score, &selection).expect("test: fits");
        assert!(prompt.contains("45/100 (tier: high)"));
        assert!(prompt.contains("- high_blood_pressure (+20)"));
        assert!(prompt.contains("headache (mild)"));
        assert!(prompt.contains("\"warningSystem\""));
        assert!(prompt.contains("- Heart rate: not recorded"));
        assert!(!prompt.contains("critical tier: lead"));
    }

    #[test]
    fn test_use_case_changes_task() {
        let score = RiskScorer::standard().score(&input());
        let registry = ModelRegistry::standard();
        let triage = ModelSelector::select(UseCase::EmergencyTriage, RiskTier::High, &registry);
        let prompt = build_prompt(&input(), &score, &triage).expect("test: fits");
        assert!(prompt.contains("triage guidance"));
    }

    #[test]
    fn test_small_context_window_is_rejected() {
        let score = RiskScorer::standard().score(&input());
        let mut selection = ModelSelector::select(
            UseCase::RiskAssessment,
            score.tier(),
            &ModelRegistry::standard(),
        );
        selection.primary = ModelProfile::new("tiny", 64, 256, 0.4, 0.0);
        selection.context_window = 256;
        let err = build_prompt(&input(), &score, &selection).unwrap_err();
        assert_eq!(err.model, "tiny");
        assert_eq!(err.limit, 256);
        assert_eq!(err.reserved, 64);
    }
}
