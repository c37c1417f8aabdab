//! Demo binary for maternal-risk-engine
//!
//! Scores a sample patient and prints the assembled report as JSON.
//!
//! ## Usage
//!
//! ```text
//! risk-engine [--config risk-engine.toml] [--schema]
//! ```
//!
//! ## Environment Variables
//!
//! - `RISK_ENGINE_API_KEY`: use the HTTP provider; unset runs against a
//!   scripted provider with a canned narrative
//! - `LOG_FORMAT=json`: structured JSON output (production)
//! - `RUST_LOG=info`: log level filter (default: info)

use maternal_risk_engine::config::{self, EngineConfig};
use maternal_risk_engine::provider::API_KEY_ENV;
use maternal_risk_engine::{
    init_tracing_with, metrics, HttpProvider, ModelProvider, PatientAssessmentInput,
    RiskAssessmentEngine, ScriptedProvider, UseCase,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

const DEMO_NARRATIVE: &str = r#"{
  "riskAssessment": {
    "riskLevel": "high",
    "summary": "Hypertensive reading with low BMI in a patient far from care."
  },
  "recommendations": {
    "immediate": ["Repeat blood pressure within 4 hours"],
    "shortTerm": ["Weekly blood pressure checks", "Nutrition counselling"],
    "longTerm": ["Plan delivery at a facility with obstetric cover"]
  },
  "warningSystem": {
    "redFlags": ["Severe headache", "Blurred vision", "Sudden swelling"],
    "yellowFlags": ["Poor appetite", "Fatigue"]
  },
  "followUpSchedule": ["Day 3: BP check", "Week 2: antenatal visit"],
  "metadata": {}
}"#;

struct Args {
    config: Option<PathBuf>,
    schema: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config: None,
        schema: false,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().ok_or("--config needs a path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--schema" => args.schema = true,
            other => return Err(format!("unknown argument '{other}'")),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args()?;

    if args.schema {
        println!("{}", config::export_schema()?);
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => config::load_from_file(path)?,
        None => EngineConfig::default(),
    };

    // Initialize structured tracing (JSON or pretty, based on LOG_FORMAT env)
    let _ = init_tracing_with(config.observability.log_format);

    if config.observability.metrics_enabled {
        metrics::init_metrics()?;
    }

    info!("Starting maternal-risk-engine demo");

    let provider: Arc<dyn ModelProvider> = match HttpProvider::from_env() {
        Ok(http) => {
            info!("Using HTTP provider");
            Arc::new(http)
        }
        Err(_) => {
            warn!(var = API_KEY_ENV, "API key not set, using scripted provider");
            Arc::new(ScriptedProvider::always_text(DEMO_NARRATIVE, 1))
        }
    };

    let engine = RiskAssessmentEngine::from_config(&config, provider)?;

    let input = PatientAssessmentInput::from_json(&json!({
        "age": 29,
        "pregnancyWeek": 24,
        "vitals": {"bloodPressure": "150/95", "heartRate": 88, "bmi": 17.0, "temperature": 36.8},
        "symptoms": {"headache": "mild"},
        "location": "rural",
        "accessToHealthcare": true
    }))?;

    let report = engine.assess(&input, UseCase::RiskAssessment).await;
    info!(
        score = report.risk_score,
        tier = %report.risk_level,
        narrative_unavailable = report.narrative_unavailable,
        "Assessment complete"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    if config.observability.metrics_enabled {
        let summary = metrics::get_metrics_summary();
        info!(?summary, "Metrics summary");
    }

    Ok(())
}
