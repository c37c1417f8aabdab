//! Integration tests for `HttpProvider` against a mocked messages endpoint
//!
//! Covers:
//! - Request shape (headers, model, max_tokens, temperature)
//! - Text and JSON content blocks
//! - Status classification: 429, 400, 500
//! - Transport timeout
//! - Engine degradation when the endpoint keeps failing

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use maternal_risk_engine::config::EngineConfig;
use maternal_risk_engine::provider::{ProviderRequest, ProviderResponse};
use maternal_risk_engine::{
    HttpProvider, ModelProvider, PatientAssessmentInput, ProviderError, RiskAssessmentEngine,
    RiskTier, UseCase,
};

// ============================================================================
// Helpers
// ============================================================================

fn provider(server: &MockServer) -> HttpProvider {
    HttpProvider::new("test-key").with_base_url(server.uri())
}

fn request() -> ProviderRequest {
    ProviderRequest {
        model: "claude-3-5-sonnet-20241022".to_string(),
        prompt: "Assess this patient".to_string(),
        max_tokens: 512,
        temperature: 0.25,
    }
}

fn messages_body(text: &str) -> serde_json::Value {
    json!({
        "id": "msg_1",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": text}],
        "stop_reason": "end_turn"
    })
}

// ============================================================================
// Success paths
// ============================================================================

#[tokio::test]
async fn test_sends_headers_and_body_and_returns_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "model": "claude-3-5-sonnet-20241022",
            "max_tokens": 512,
            "messages": [{"role": "user", "content": "Assess this patient"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(messages_body("plain prose")))
        .expect(1)
        .mount(&server)
        .await;

    let response = provider(&server)
        .invoke(&request())
        .await
        .expect("must succeed against mock");
    assert_eq!(response, ProviderResponse::Text("plain prose".to_string()));
}

#[tokio::test]
async fn test_json_object_content_is_returned_as_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(messages_body(r#"{"followUpSchedule": ["Week 30"]}"#)),
        )
        .mount(&server)
        .await;

    let response = provider(&server)
        .invoke(&request())
        .await
        .expect("must succeed against mock");
    match response {
        ProviderResponse::Json(value) => assert_eq!(value["followUpSchedule"][0], "Week 30"),
        other => panic!("expected JSON, got {other:?}"),
    }
}

// ============================================================================
// Error classification
// ============================================================================

#[tokio::test]
async fn test_429_is_rate_limited_with_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&server)
        .await;

    let err = provider(&server).invoke(&request()).await.unwrap_err();
    assert_eq!(
        err,
        ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(7))
        }
    );
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_400_is_malformed_and_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("max_tokens too large"))
        .mount(&server)
        .await;

    let err = provider(&server).invoke(&request()).await.unwrap_err();
    match &err {
        ProviderError::Malformed { status, message } => {
            assert_eq!(*status, 400);
            assert!(message.contains("max_tokens"));
        }
        other => panic!("expected Malformed, got {other:?}"),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_500_is_retryable_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = provider(&server).invoke(&request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::ServerError { status: 500, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(messages_body("late"))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = provider(&server)
        .with_timeout(Duration::from_millis(100))
        .invoke(&request())
        .await
        .unwrap_err();
    assert_eq!(err, ProviderError::Timeout);
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn test_engine_degrades_when_endpoint_keeps_failing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&server)
        .await;

    let mut config = EngineConfig::default();
    config.retry.initial_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    let http: Arc<dyn ModelProvider> = Arc::new(provider(&server));
    let engine = RiskAssessmentEngine::from_config(&config, http).expect("valid config");

    let mut input = PatientAssessmentInput::default();
    input.vitals.blood_pressure = Some("150/95".into());
    input.vitals.bmi = Some(17.0);
    input.location = Some("rural".into());

    let report = engine.assess(&input, UseCase::RiskAssessment).await;
    assert_eq!(report.risk_score, 45.0);
    assert_eq!(report.risk_level, RiskTier::High);
    assert!(report.narrative_unavailable);
    assert_eq!(report.metadata.attempt_count, 4);
}

#[tokio::test]
async fn test_engine_uses_narrative_from_endpoint() {
    let narrative = json!({
        "riskAssessment": {"riskLevel": "high", "summary": "Hypertension"},
        "recommendations": {"immediate": ["Recheck BP"], "shortTerm": [], "longTerm": []},
        "warningSystem": {"redFlags": ["Visual disturbance"], "yellowFlags": []},
        "followUpSchedule": ["Weekly visits"],
        "metadata": {}
    });
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(messages_body(&narrative.to_string())))
        .mount(&server)
        .await;

    let http: Arc<dyn ModelProvider> = Arc::new(provider(&server));
    let engine =
        RiskAssessmentEngine::from_config(&EngineConfig::default(), http).expect("valid config");
    let report = engine
        .assess(&PatientAssessmentInput::default(), UseCase::FollowUpPlanning)
        .await;

    assert!(!report.narrative_unavailable);
    assert_eq!(report.warning_system.red_flags, vec!["Visual disturbance"]);
    assert_eq!(report.risk_level, RiskTier::Low);
    assert_eq!(report.advisory_risk_level, Some(RiskTier::High));
    assert_eq!(
        report.metadata.model_used.as_deref(),
        Some("claude-3-5-haiku-20241022")
    );
}
