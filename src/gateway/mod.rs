//! # Stage: Invocation Gateway
//!
//! ## Responsibility
//! Drive one narrative request through the AI provider: wait for a
//! rate-limit token, call the selected model under a per-attempt timeout,
//! retry retryable failures with exponential backoff, then make exactly one
//! fallback attempt.
//!
//! ## Guarantees
//! - At most `max_retries` primary attempts plus one fallback attempt
//! - Backoff happens strictly before the next rate-limit wait, never before
//!   the fallback attempt
//! - Fatal provider errors (4xx) end the request immediately: no retry, no
//!   fallback
//! - A rate-limit wait longer than `queue_wait_timeout` fails with
//!   [`InvocationError::ResourceExhausted`] without calling the provider
//! - Cancellation before the remote call means zero attempts; cancellation
//!   during it records the attempt as [`AttemptOutcome::Cancelled`]
//! - The request never runs longer than its overall deadline (time spent
//!   queued for rate-limit tokens excluded)
//!
//! ## NOT Responsible For
//! - Choosing which error classes exist (that belongs to `provider`)
//! - Interpreting the model output (that belongs to `report`)

pub mod handle;
pub mod state;

pub use handle::InvocationHandle;
pub use state::{CancelOutcome, InvocationState};

use crate::metrics;
use crate::models::{ModelProfile, ModelRegistry, ModelSelector, Selection, UseCase};
use crate::provider::{ModelProvider, ProviderError, ProviderRequest, ProviderResponse};
use crate::resilience::{BackoffPolicy, Clock, RateLimitError, RateLimiter, TokioClock};
use crate::scoring::RiskTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use state::Lifecycle;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument, Span};
use uuid::Uuid;

// ── Request ────────────────────────────────────────────────────────────────

/// Request priority. Derived from the deterministic tier unless set.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Low-risk, can wait.
    Routine,
    /// Standard priority.
    #[default]
    Normal,
    /// High-risk patient.
    Urgent,
    /// Critical-risk patient.
    Emergency,
}

impl Priority {
    /// Default priority for a tier.
    pub fn for_tier(tier: RiskTier) -> Self {
        match tier {
            RiskTier::Low => Self::Routine,
            RiskTier::Medium => Self::Normal,
            RiskTier::High => Self::Urgent,
            RiskTier::Critical => Self::Emergency,
        }
    }
}

/// One narrative request.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    /// Unique id, propagated to logs and the report.
    pub id: Uuid,
    /// What the narrative is for.
    pub use_case: UseCase,
    /// Rendered prompt.
    pub payload: String,
    /// Scheduling priority.
    pub priority: Priority,
    /// Deterministic tier; Critical triggers the emergency model override.
    pub tier: RiskTier,
}

impl InvocationRequest {
    /// New request with a fresh id and tier-derived priority.
    pub fn new(use_case: UseCase, payload: impl Into<String>, tier: RiskTier) -> Self {
        Self {
            id: Uuid::new_v4(),
            use_case,
            payload: payload.into(),
            priority: Priority::for_tier(tier),
            tier,
        }
    }

    /// Override the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

// ── Settings ───────────────────────────────────────────────────────────────

/// Retry, timeout and backpressure parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Primary-model attempts before falling back (at least one is made).
    pub max_retries: u32,
    /// Timeout of each provider call.
    pub attempt_timeout: Duration,
    /// Longest acceptable wait for a rate-limit token.
    pub queue_wait_timeout: Duration,
    /// Delay schedule between primary attempts.
    pub backoff: BackoffPolicy,
    /// Cap on concurrent provider calls across all requests.
    pub max_concurrent_in_flight: Option<usize>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            attempt_timeout: Duration::from_secs(30),
            queue_wait_timeout: Duration::from_secs(10),
            backoff: BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(10)),
            max_concurrent_in_flight: None,
        }
    }
}

impl GatewaySettings {
    /// Number of primary-model attempts.
    pub fn primary_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Per-attempt timeouts for every attempt (primary and fallback) plus
    /// the largest possible backoff total.
    pub fn overall_deadline(&self) -> Duration {
        let attempts = self.primary_attempts();
        self.attempt_timeout.saturating_mul(attempts + 1)
            + self.backoff.max_total_delay(attempts)
    }
}

// ── Attempts and results ───────────────────────────────────────────────────

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The provider answered.
    Success,
    /// The per-attempt timeout fired.
    Timeout,
    /// The provider returned an error.
    ProviderError,
    /// The caller cancelled while the call was outstanding.
    Cancelled,
}

impl AttemptOutcome {
    /// Stable snake_case label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::ProviderError => "provider_error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Record of one provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationAttempt {
    /// 1-based; the fallback attempt follows the last primary attempt.
    pub attempt_number: u32,
    /// Model called.
    pub model: String,
    /// Whether this was the fallback attempt.
    pub fallback: bool,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// Backoff slept before this attempt.
    pub backoff_before: Duration,
    /// Time spent in the provider call.
    pub elapsed: Duration,
    /// How it ended.
    pub outcome: AttemptOutcome,
    /// Provider error, for `ProviderError` and `Timeout` outcomes.
    pub error: Option<ProviderError>,
}

/// Terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    /// A model produced output.
    Success,
    /// No output; see [`InvocationResult::output`].
    FatalFailure,
}

/// Why the gateway gave up.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExhaustionCause {
    /// The rate-limit wait would have exceeded the queue-wait budget.
    #[error("rate-limit wait of {wait:?} exceeds queue budget {timeout:?}")]
    QueueWait {
        /// Time until the next token.
        wait: Duration,
        /// Configured budget.
        timeout: Duration,
    },
    /// Every primary attempt and the fallback attempt failed.
    #[error("primary retries and fallback attempt failed")]
    RetriesAndFallback,
    /// The overall deadline elapsed.
    #[error("overall deadline of {budget:?} elapsed")]
    Deadline {
        /// The deadline.
        budget: Duration,
    },
}

/// Errors surfaced by the gateway.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InvocationError {
    /// A non-retryable provider error.
    #[error("fatal provider error: {0}")]
    Fatal(ProviderError),

    /// Backpressure, retries exhausted, or deadline.
    #[error("resources exhausted: {cause}")]
    ResourceExhausted {
        /// What ran out.
        cause: ExhaustionCause,
        /// Last provider error seen, if any.
        last_error: Option<ProviderError>,
    },

    /// The caller cancelled.
    #[error("invocation cancelled")]
    Cancelled,

    /// The spawned invocation task failed.
    #[error("invocation task failed: {0}")]
    TaskFailed(String),
}

impl InvocationError {
    /// Short stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fatal(_) => "fatal",
            Self::ResourceExhausted {
                cause: ExhaustionCause::QueueWait { .. },
                ..
            } => "queue_wait_exceeded",
            Self::ResourceExhausted {
                cause: ExhaustionCause::RetriesAndFallback,
                ..
            } => "exhausted",
            Self::ResourceExhausted {
                cause: ExhaustionCause::Deadline { .. },
                ..
            } => "deadline",
            Self::Cancelled => "cancelled",
            Self::TaskFailed(_) => "task_failed",
        }
    }
}

/// Final result of an invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult {
    /// Id of the request.
    pub request_id: Uuid,
    /// Use-case of the request.
    pub use_case: UseCase,
    /// Terminal status.
    pub status: InvocationStatus,
    /// Model that produced the output.
    pub model_used: Option<String>,
    /// Every provider call made, in order.
    pub attempts: Vec<InvocationAttempt>,
    /// Model output or the reason there is none.
    pub output: Result<ProviderResponse, InvocationError>,
    /// Whether the Critical-tier override chose the primary model.
    pub emergency_override: bool,
}

impl InvocationResult {
    /// Whether a model produced output.
    pub fn is_success(&self) -> bool {
        self.status == InvocationStatus::Success
    }

    /// Number of provider calls made.
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}

// ── Gateway ────────────────────────────────────────────────────────────────

struct Inner {
    provider: Arc<dyn ModelProvider>,
    limiter: RateLimiter,
    registry: Arc<ModelRegistry>,
    settings: GatewaySettings,
    clock: Arc<dyn Clock>,
    in_flight: Option<Arc<Semaphore>>,
}

/// Resilient front door to the AI provider.
///
/// Cloning is cheap; clones share the provider, limiter and in-flight cap.
#[derive(Clone)]
pub struct InvocationGateway {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for InvocationGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationGateway")
            .field("settings", &self.inner.settings)
            .field("limiter", &self.inner.limiter)
            .finish_non_exhaustive()
    }
}

/// Per-invocation bookkeeping.
struct RunState {
    attempts: Vec<InvocationAttempt>,
    last_error: Option<ProviderError>,
    started: Instant,
    queue_waited: Duration,
    budget: Duration,
}

impl RunState {
    /// Deadline budget left, excluding rate-limit queue time.
    fn remaining(&self, now: Instant) -> Duration {
        let active = now
            .saturating_duration_since(self.started)
            .saturating_sub(self.queue_waited);
        self.budget.saturating_sub(active)
    }

    fn deadline_error(&self) -> InvocationError {
        InvocationError::ResourceExhausted {
            cause: ExhaustionCause::Deadline {
                budget: self.budget,
            },
            last_error: self.last_error.clone(),
        }
    }
}

enum Step {
    Done(ProviderResponse),
    Retry(ProviderError),
    Fatal(ProviderError),
    Abort(InvocationError),
}

struct AttemptPlan<'a> {
    model: &'a ModelProfile,
    number: u32,
    fallback: bool,
    backoff_before: Duration,
}

impl InvocationGateway {
    /// Gateway on the tokio clock.
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        limiter: RateLimiter,
        registry: Arc<ModelRegistry>,
        settings: GatewaySettings,
    ) -> Self {
        Self::with_clock(provider, limiter, registry, settings, Arc::new(TokioClock))
    }

    /// Gateway on an injected clock (used for `now` and backoff sleeps).
    pub fn with_clock(
        provider: Arc<dyn ModelProvider>,
        limiter: RateLimiter,
        registry: Arc<ModelRegistry>,
        settings: GatewaySettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let in_flight = settings
            .max_concurrent_in_flight
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        Self {
            inner: Arc::new(Inner {
                provider,
                limiter,
                registry,
                settings,
                clock,
                in_flight,
            }),
        }
    }

    /// Active settings.
    pub fn settings(&self) -> &GatewaySettings {
        &self.inner.settings
    }

    /// The shared rate limiter.
    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    /// The model registry.
    pub fn registry(&self) -> &ModelRegistry {
        &self.inner.registry
    }

    /// Models that would be used for `request`.
    pub fn selection_for(&self, request: &InvocationRequest) -> Selection {
        ModelSelector::select(request.use_case, request.tier, &self.inner.registry)
    }

    /// Run `request` on the current task and wait for the result.
    pub async fn invoke(&self, request: InvocationRequest) -> InvocationResult {
        self.run(request, Arc::new(Lifecycle::new())).await
    }

    /// Run `request` on its own task. The handle can observe and cancel it.
    pub fn submit(&self, request: InvocationRequest) -> InvocationHandle {
        let lifecycle = Arc::new(Lifecycle::new());
        let request_id = request.id;
        let use_case = request.use_case;
        let gateway = self.clone();
        let task_lifecycle = Arc::clone(&lifecycle);
        let task = tokio::spawn(async move { gateway.run(request, task_lifecycle).await });
        InvocationHandle {
            request_id,
            use_case,
            lifecycle,
            task,
        }
    }

    async fn run(&self, request: InvocationRequest, lifecycle: Arc<Lifecycle>) -> InvocationResult {
        let selection = self.selection_for(&request);
        let span = info_span!(
            "invocation",
            request_id = %request.id,
            use_case = %request.use_case,
            priority = ?request.priority,
            tier = %request.tier,
            outcome = tracing::field::Empty,
            attempts = tracing::field::Empty,
        );

        async move {
            let mut run = RunState {
                attempts: Vec::new(),
                last_error: None,
                started: self.inner.clock.now(),
                queue_waited: Duration::ZERO,
                budget: self.inner.settings.overall_deadline(),
            };

            if selection.emergency_override {
                info!(
                    model = %selection.primary.name,
                    temperature = selection.temperature,
                    "emergency override in effect"
                );
            }

            let outcome = self.execute(&request, &selection, &lifecycle, &mut run).await;
            let elapsed = self
                .inner
                .clock
                .now()
                .saturating_duration_since(run.started);

            let (status, final_state, model_used, output) = match outcome {
                Ok((response, model)) => (
                    InvocationStatus::Success,
                    InvocationState::Succeeded,
                    Some(model),
                    Ok(response),
                ),
                Err(InvocationError::Cancelled) => (
                    InvocationStatus::FatalFailure,
                    InvocationState::Cancelled,
                    None,
                    Err(InvocationError::Cancelled),
                ),
                Err(e) => (
                    InvocationStatus::FatalFailure,
                    InvocationState::FatalFailure,
                    None,
                    Err(e),
                ),
            };
            lifecycle.transition(final_state);

            let label = match &output {
                Ok(_) => "success",
                Err(e) => e.kind(),
            };
            metrics::record_invocation(request.use_case.as_str(), label, elapsed);
            Span::current().record("outcome", label);
            Span::current().record("attempts", run.attempts.len() as u64);

            match &output {
                Ok(_) => info!(
                    model = model_used.as_deref().unwrap_or_default(),
                    attempts = run.attempts.len(),
                    duration_ms = elapsed.as_millis() as u64,
                    "invocation succeeded"
                ),
                Err(e) => warn!(
                    error = %e,
                    attempts = run.attempts.len(),
                    duration_ms = elapsed.as_millis() as u64,
                    "invocation failed"
                ),
            }

            InvocationResult {
                request_id: request.id,
                use_case: request.use_case,
                status,
                model_used,
                attempts: run.attempts,
                output,
                emergency_override: selection.emergency_override,
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        request: &InvocationRequest,
        selection: &Selection,
        lifecycle: &Lifecycle,
        run: &mut RunState,
    ) -> Result<(ProviderResponse, String), InvocationError> {
        let primary_attempts = self.inner.settings.primary_attempts();

        for number in 1..=primary_attempts {
            let backoff_before = self.inner.settings.backoff.delay_before(number);
            if number > 1 {
                self.pause(backoff_before, lifecycle, run).await?;
            }

            let plan = AttemptPlan {
                model: &selection.primary,
                number,
                fallback: false,
                backoff_before,
            };
            match self.attempt(request, selection, &plan, lifecycle, run).await {
                Step::Done(response) => return Ok((response, selection.primary.name.clone())),
                Step::Retry(error) => {
                    lifecycle.transition(InvocationState::RetryableFailure);
                    run.last_error = Some(error);
                }
                Step::Fatal(error) => return Err(InvocationError::Fatal(error)),
                Step::Abort(error) => return Err(error),
            }
        }

        lifecycle.transition(InvocationState::Exhausted);
        warn!(
            primary = %selection.primary.name,
            fallback = %selection.fallback.name,
            attempts = primary_attempts,
            "primary model exhausted, trying fallback"
        );
        lifecycle.transition(InvocationState::FallbackAttempt);

        let plan = AttemptPlan {
            model: &selection.fallback,
            number: primary_attempts + 1,
            fallback: true,
            backoff_before: Duration::ZERO,
        };
        match self.attempt(request, selection, &plan, lifecycle, run).await {
            Step::Done(response) => Ok((response, selection.fallback.name.clone())),
            Step::Retry(error) | Step::Fatal(error) => {
                run.last_error = Some(error);
                Err(InvocationError::ResourceExhausted {
                    cause: ExhaustionCause::RetriesAndFallback,
                    last_error: run.last_error.clone(),
                })
            }
            Step::Abort(error) => Err(error),
        }
    }

    /// Backoff sleep, cancellable and bounded by the deadline.
    async fn pause(
        &self,
        delay: Duration,
        lifecycle: &Lifecycle,
        run: &RunState,
    ) -> Result<(), InvocationError> {
        if delay > run.remaining(self.inner.clock.now()) {
            return Err(run.deadline_error());
        }
        tokio::select! {
            biased;
            _ = lifecycle.cancelled() => Err(InvocationError::Cancelled),
            _ = self.inner.clock.sleep(delay) => Ok(()),
        }
    }

    async fn attempt(
        &self,
        request: &InvocationRequest,
        selection: &Selection,
        plan: &AttemptPlan<'_>,
        lifecycle: &Lifecycle,
        run: &mut RunState,
    ) -> Step {
        let settings = &self.inner.settings;
        let model = plan.model;

        // ── In-flight cap ──────────────────────────────────────────────────
        lifecycle.transition(InvocationState::RateLimitWait);
        let _permit = match &self.inner.in_flight {
            None => None,
            Some(semaphore) => {
                let remaining = run.remaining(self.inner.clock.now());
                let permit = tokio::select! {
                    biased;
                    _ = lifecycle.cancelled() => return Step::Abort(InvocationError::Cancelled),
                    permit = tokio::time::timeout(remaining, Arc::clone(semaphore).acquire_owned()) => permit,
                };
                match permit {
                    Ok(Ok(permit)) => Some(permit),
                    Ok(Err(_closed)) => {
                        return Step::Abort(InvocationError::TaskFailed(
                            "in-flight limiter closed".to_string(),
                        ))
                    }
                    Err(_elapsed) => return Step::Abort(run.deadline_error()),
                }
            }
        };

        // Queue time is excluded from the budget, so this holds after the
        // token wait too.
        let timeout = settings
            .attempt_timeout
            .min(run.remaining(self.inner.clock.now()));
        if timeout.is_zero() {
            return Step::Abort(run.deadline_error());
        }

        // ── Rate-limit wait ────────────────────────────────────────────────
        // Taken after the permit so a deadline hit while queued for the
        // in-flight cap leaves the bucket untouched.
        let acquired = tokio::select! {
            biased;
            _ = lifecycle.cancelled() => return Step::Abort(InvocationError::Cancelled),
            acquired = self.inner.limiter.acquire(settings.queue_wait_timeout) => acquired,
        };
        match acquired {
            Ok(waited) => run.queue_waited += waited,
            Err(RateLimitError::Exceeded {
                wait,
                timeout: queue_timeout,
            }) => {
                metrics::inc_rate_limit_rejection();
                warn!(
                    attempt = plan.number,
                    wait_ms = wait.as_millis() as u64,
                    "queue wait budget exceeded, shedding request"
                );
                return Step::Abort(InvocationError::ResourceExhausted {
                    cause: ExhaustionCause::QueueWait {
                        wait,
                        timeout: queue_timeout,
                    },
                    last_error: run.last_error.clone(),
                });
            }
        }

        if !lifecycle.try_begin_flight() {
            return Step::Abort(InvocationError::Cancelled);
        }

        // ── Remote call ────────────────────────────────────────────────────
        let provider_request = ProviderRequest {
            model: model.name.clone(),
            prompt: request.payload.clone(),
            max_tokens: selection.max_tokens_for(model),
            temperature: selection.temperature_for(model),
        };
        let started_at = Utc::now();
        let started = self.inner.clock.now();
        info!(
            attempt = plan.number,
            model = %model.name,
            fallback = plan.fallback,
            timeout_ms = timeout.as_millis() as u64,
            "attempt started"
        );

        let result = tokio::select! {
            biased;
            _ = lifecycle.cancelled() => None,
            result = tokio::time::timeout(timeout, self.inner.provider.invoke(&provider_request)) => Some(result),
        };
        let elapsed = self.inner.clock.now().saturating_duration_since(started);

        let (outcome, step) = match result {
            None => (AttemptOutcome::Cancelled, Step::Abort(InvocationError::Cancelled)),
            Some(Err(_elapsed)) => (AttemptOutcome::Timeout, Step::Retry(ProviderError::Timeout)),
            Some(Ok(Ok(response))) => (AttemptOutcome::Success, Step::Done(response)),
            Some(Ok(Err(error))) => {
                if matches!(error, ProviderError::RateLimited { .. }) {
                    self.inner.limiter.trigger_cooldown();
                }
                let step = if error.is_retryable() {
                    Step::Retry(error)
                } else {
                    Step::Fatal(error)
                };
                (AttemptOutcome::ProviderError, step)
            }
        };

        let error = match &step {
            Step::Retry(e) | Step::Fatal(e) => Some(e.clone()),
            Step::Done(_) | Step::Abort(_) => None,
        };
        match &error {
            None => info!(
                attempt = plan.number,
                model = %model.name,
                outcome = outcome.as_str(),
                elapsed_ms = elapsed.as_millis() as u64,
                "attempt finished"
            ),
            Some(e) => warn!(
                attempt = plan.number,
                model = %model.name,
                outcome = outcome.as_str(),
                error = %e,
                retryable = e.is_retryable(),
                elapsed_ms = elapsed.as_millis() as u64,
                "attempt failed"
            ),
        }
        metrics::inc_attempt(&model.name, outcome.as_str());

        run.attempts.push(InvocationAttempt {
            attempt_number: plan.number,
            model: model.name.clone(),
            fallback: plan.fallback,
            started_at,
            backoff_before: plan.backoff_before,
            elapsed,
            outcome,
            error,
        });
        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ScriptedProvider, ScriptedReply};
    use crate::resilience::RateLimitConfig;

    fn settings() -> GatewaySettings {
        GatewaySettings {
            max_retries: 3,
            attempt_timeout: Duration::from_secs(2),
            queue_wait_timeout: Duration::from_secs(5),
            backoff: BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1)),
            max_concurrent_in_flight: None,
        }
    }

    fn gateway(provider: Arc<ScriptedProvider>) -> InvocationGateway {
        InvocationGateway::new(
            provider,
            RateLimiter::new(RateLimitConfig {
                requests_per_minute: 6_000,
                burst_limit: 100,
                cooldown_period: Duration::from_millis(10),
            }),
            Arc::new(ModelRegistry::standard()),
            settings(),
        )
    }

    fn ok(text: &str) -> ScriptedReply {
        ScriptedReply::Respond(Ok(ProviderResponse::Text(text.to_string())))
    }

    #[test]
    fn test_overall_deadline_covers_every_attempt_and_backoff() {
        // 4 × 2s + (100 + 200) ms
        assert_eq!(settings().overall_deadline(), Duration::from_millis(8_300));
    }

    #[test]
    fn test_zero_retries_still_makes_one_primary_attempt() {
        let s = GatewaySettings {
            max_retries: 0,
            ..settings()
        };
        assert_eq!(s.primary_attempts(), 1);
    }

    #[test]
    fn test_priority_follows_tier() {
        assert_eq!(Priority::for_tier(RiskTier::Critical), Priority::Emergency);
        assert_eq!(Priority::for_tier(RiskTier::Low), Priority::Routine);
        let request = InvocationRequest::new(UseCase::RiskAssessment, "p", RiskTier::High)
            .with_priority(Priority::Routine);
        assert_eq!(request.priority, Priority::Routine);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_has_no_backoff() {
        let provider = Arc::new(ScriptedProvider::new([ok("fine")]));
        let result = gateway(Arc::clone(&provider))
            .invoke(InvocationRequest::new(
                UseCase::RiskAssessment,
                "prompt",
                RiskTier::Low,
            ))
            .await;

        assert!(result.is_success());
        assert_eq!(result.attempt_count(), 1);
        assert_eq!(result.attempts[0].backoff_before, Duration::ZERO);
        assert_eq!(
            result.model_used.as_deref(),
            Some("claude-3-5-sonnet-20241022")
        );
        assert!(!result.emergency_override);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_request_carries_selection_parameters() {
        let provider = Arc::new(ScriptedProvider::new([ok("fine")]));
        let result = gateway(Arc::clone(&provider))
            .invoke(InvocationRequest::new(
                UseCase::EmergencyTriage,
                "triage prompt",
                RiskTier::Critical,
            ))
            .await;

        assert!(result.emergency_override);
        let call = &provider.calls()[0];
        assert_eq!(call.model, "claude-3-opus-20240229");
        assert_eq!(call.prompt, "triage prompt");
        assert!(call.temperature <= 0.3);
        assert_eq!(call.max_tokens, 2048);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_reply_triggers_cooldown_and_retries() {
        let provider = Arc::new(ScriptedProvider::new([
            ScriptedReply::Respond(Err(ProviderError::RateLimited { retry_after: None })),
            ok("after cooldown"),
        ]));
        let gw = gateway(Arc::clone(&provider));
        let result = gw
            .invoke(InvocationRequest::new(
                UseCase::RiskAssessment,
                "p",
                RiskTier::Medium,
            ))
            .await;

        assert!(result.is_success());
        assert_eq!(result.attempt_count(), 2);
        assert_eq!(
            result.attempts[0].error,
            Some(ProviderError::RateLimited { retry_after: None })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_provider_times_out_each_attempt() {
        let provider = Arc::new(ScriptedProvider::new([
            ScriptedReply::Hang,
            ScriptedReply::Hang,
            ScriptedReply::Hang,
            ScriptedReply::Hang,
        ]));
        let result = gateway(Arc::clone(&provider))
            .invoke(InvocationRequest::new(
                UseCase::RiskAssessment,
                "p",
                RiskTier::Low,
            ))
            .await;

        assert_eq!(result.status, InvocationStatus::FatalFailure);
        assert_eq!(result.attempt_count(), 4);
        assert!(result
            .attempts
            .iter()
            .all(|a| a.outcome == AttemptOutcome::Timeout));
        assert!(matches!(
            result.output,
            Err(InvocationError::ResourceExhausted {
                cause: ExhaustionCause::RetriesAndFallback,
                last_error: Some(ProviderError::Timeout),
            })
        ));
    }
}
