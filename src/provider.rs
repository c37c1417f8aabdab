//! AI model providers.
//!
//! Provides the [`ModelProvider`] trait and two implementations:
//! - [`HttpProvider`]: Anthropic-style messages API over `reqwest`
//! - [`ScriptedProvider`]: deterministic double replaying a queued script
//!
//! ## Environment Variables
//!
//! - `RISK_ENGINE_API_KEY`: required by [`HttpProvider::from_env`]

use crate::config::ConfigError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the provider API key.
pub const API_KEY_ENV: &str = "RISK_ENGINE_API_KEY";

/// Default provider endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One call to a model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderRequest {
    /// Model identifier.
    pub model: String,
    /// Rendered prompt.
    pub prompt: String,
    /// Generation budget.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

/// Raw model output.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderResponse {
    /// Free text, possibly containing embedded JSON.
    Text(String),
    /// Already-parsed JSON.
    Json(Value),
}

impl ProviderResponse {
    /// The output as text, serialising JSON if needed.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Json(value) => value.to_string(),
        }
    }
}

/// Errors reported by a provider.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    /// The call did not complete in time.
    #[error("provider timed out")]
    Timeout,

    /// The provider asked us to slow down (HTTP 429).
    #[error("provider rate limited the request")]
    RateLimited {
        /// `Retry-After` hint, if sent.
        retry_after: Option<Duration>,
    },

    /// The request was rejected as invalid (HTTP 4xx other than 408/429).
    #[error("provider rejected request ({status}): {message}")]
    Malformed {
        /// HTTP status.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The provider failed (HTTP 5xx).
    #[error("provider server error ({status}): {message}")]
    ServerError {
        /// HTTP status.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether the gateway may retry this error.
    ///
    /// Only [`ProviderError::Malformed`] is fatal.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Malformed { .. })
    }

    /// Short stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Malformed { .. } => "malformed",
            Self::ServerError { .. } => "server_error",
            Self::Network(_) => "network",
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        match status {
            429 => Self::RateLimited { retry_after },
            408 => Self::Timeout,
            400..=499 => Self::Malformed { status, message },
            _ => Self::ServerError { status, message },
        }
    }
}

/// Trait for remote model calls.
///
/// Implementations must be thread-safe (Send + Sync) for use across tasks.
/// The trait is object-safe to allow dynamic dispatch via
/// `Arc<dyn ModelProvider>`.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Invoke the model once. Timeouts are enforced by the caller.
    async fn invoke(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError>;
}

// ============================================================================
// HTTP Provider
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Messages-API provider.
///
/// ## Example
///
/// ```no_run
/// use maternal_risk_engine::HttpProvider;
/// use std::time::Duration;
///
/// let provider = HttpProvider::from_env()
///     .expect("RISK_ENGINE_API_KEY set")
///     .with_timeout(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl HttpProvider {
    /// Provider with an explicit API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Provider keyed from `RISK_ENGINE_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnv`] if the variable is unset or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Ok(Self::new(key)),
            _ => Err(ConfigError::MissingEnv {
                var: API_KEY_ENV.to_string(),
            }),
        }
    }

    /// Override the endpoint (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Transport-level timeout. The gateway's per-attempt timeout still
    /// applies on top.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Prefer JSON when the whole text is a JSON value.
fn classify_text(text: String) -> ProviderResponse {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(value) if value.is_object() => ProviderResponse::Json(value),
        _ => ProviderResponse::Text(text),
    }
}

#[async_trait]
impl ModelProvider for HttpProvider {
    async fn invoke(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let body = MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: [Message {
                role: "user",
                content: &request.prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(
                status.as_u16(),
                message,
                retry_after,
            ));
        }

        let raw = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(format!("failed to read body: {e}")))?;

        match serde_json::from_str::<MessagesResponse>(&raw) {
            Ok(parsed) => {
                let text: String = parsed
                    .content
                    .into_iter()
                    .filter_map(|block| block.text)
                    .collect::<Vec<_>>()
                    .join("");
                Ok(classify_text(text))
            }
            Err(_) => Ok(ProviderResponse::Text(raw)),
        }
    }
}

// ============================================================================
// Scripted Provider (Testing)
// ============================================================================

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Return immediately.
    Respond(Result<ProviderResponse, ProviderError>),
    /// Return after a delay.
    Delay(Duration, Result<ProviderResponse, ProviderError>),
    /// Never return.
    Hang,
}

/// Deterministic provider replaying a queue of replies and recording every
/// request it receives.
///
/// Once the script is exhausted every call fails with
/// [`ProviderError::Network`].
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    /// Provider replaying `script` in order.
    pub fn new(script: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Provider answering every call with `text`.
    pub fn always_text(text: impl Into<String>, calls: usize) -> Self {
        let text = text.into();
        Self::new((0..calls).map(|_| ScriptedReply::Respond(Ok(ProviderResponse::Text(text.clone())))))
    }

    /// Append a reply.
    pub fn push(&self, reply: ScriptedReply) {
        self.script.lock().push_back(reply);
    }

    /// Requests received so far.
    pub fn calls(&self) -> Vec<ProviderRequest> {
        self.calls.lock().clone()
    }

    /// Models called so far, in order.
    pub fn models_called(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.model.clone()).collect()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn invoke(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.calls.lock().push(request.clone());
        let next = self.script.lock().pop_front();
        match next {
            Some(ScriptedReply::Respond(result)) => result,
            Some(ScriptedReply::Delay(delay, result)) => {
                tokio::time::sleep(delay).await;
                result
            }
            Some(ScriptedReply::Hang) => std::future::pending().await,
            None => Err(ProviderError::Network("script exhausted".to_string())),
        }
    }
}
