//! Invocation lifecycle and cancellation.

use parking_lot::Mutex;
use std::fmt;
use tokio::sync::watch;

/// Where an invocation currently is.
///
/// ```text
/// Pending → RateLimitWait → InFlight ─┬─► Succeeded
///              ▲                      ├─► FatalFailure
///              │   (backoff)          └─► RetryableFailure
///              └──────────────────────────────┘
/// RetryableFailure (retries spent) → Exhausted → FallbackAttempt
///                                        → RateLimitWait → InFlight → {Succeeded | FatalFailure}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationState {
    /// Accepted, no work started.
    Pending,
    /// Waiting for a rate-limit token.
    RateLimitWait,
    /// A provider call is outstanding.
    InFlight,
    /// The last attempt failed with a retryable error.
    RetryableFailure,
    /// Primary retries are spent.
    Exhausted,
    /// The single fallback attempt is being prepared.
    FallbackAttempt,
    /// Finished with a response.
    Succeeded,
    /// Finished without a response.
    FatalFailure,
    /// Finished because the caller cancelled.
    Cancelled,
}

impl InvocationState {
    /// Whether no further transitions can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::FatalFailure | Self::Cancelled)
    }

    /// Stable snake_case label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::RateLimitWait => "rate_limit_wait",
            Self::InFlight => "in_flight",
            Self::RetryableFailure => "retryable_failure",
            Self::Exhausted => "exhausted",
            Self::FallbackAttempt => "fallback_attempt",
            Self::Succeeded => "succeeded",
            Self::FatalFailure => "fatal_failure",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`InvocationHandle::cancel`](super::InvocationHandle::cancel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Cancellation was recorded while the invocation was in `during`.
    Requested {
        /// State observed when the cancel landed.
        during: InvocationState,
    },
    /// The invocation had already finished.
    AlreadyFinished(InvocationState),
}

#[derive(Debug)]
struct LifecycleState {
    state: InvocationState,
    cancelled: bool,
}

/// Shared between the running invocation and its handle.
///
/// The state and the cancel flag live under one lock so that "cancel" and
/// "start the remote call" cannot interleave: once cancel returns
/// `Requested` during `Pending` or `RateLimitWait`, no attempt is made.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    inner: Mutex<LifecycleState>,
    cancel_tx: watch::Sender<bool>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            inner: Mutex::new(LifecycleState {
                state: InvocationState::Pending,
                cancelled: false,
            }),
            cancel_tx,
        }
    }

    pub(crate) fn state(&self) -> InvocationState {
        self.inner.lock().state
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.inner.lock().cancelled
    }

    /// Move to `next` unless already terminal.
    pub(crate) fn transition(&self, next: InvocationState) {
        let mut inner = self.inner.lock();
        if !inner.state.is_terminal() {
            inner.state = next;
        }
    }

    /// Enter `InFlight` unless cancellation was requested first.
    pub(crate) fn try_begin_flight(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.cancelled || inner.state.is_terminal() {
            return false;
        }
        inner.state = InvocationState::InFlight;
        true
    }

    pub(crate) fn cancel(&self) -> CancelOutcome {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return CancelOutcome::AlreadyFinished(inner.state);
        }
        inner.cancelled = true;
        self.cancel_tx.send_replace(true);
        CancelOutcome::Requested { during: inner.state }
    }

    /// Resolves once cancellation is requested.
    pub(crate) async fn cancelled(&self) {
        let mut rx = self.cancel_tx.subscribe();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_cancel_before_flight_blocks_flight() {
        let lifecycle = Lifecycle::new();
        lifecycle.transition(InvocationState::RateLimitWait);
        assert_eq!(
            lifecycle.cancel(),
            CancelOutcome::Requested {
                during: InvocationState::RateLimitWait
            }
        );
        assert!(!lifecycle.try_begin_flight());
        assert_eq!(lifecycle.state(), InvocationState::RateLimitWait);
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let lifecycle = Lifecycle::new();
        lifecycle.transition(InvocationState::Succeeded);
        lifecycle.transition(InvocationState::RetryableFailure);
        assert_eq!(lifecycle.state(), InvocationState::Succeeded);
        assert_eq!(
            lifecycle.cancel(),
            CancelOutcome::AlreadyFinished(InvocationState::Succeeded)
        );
        assert!(!lifecycle.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_wakes_on_cancel() {
        let lifecycle = Arc::new(Lifecycle::new());
        let waiter = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move { lifecycle.cancelled().await })
        };
        tokio::task::yield_now().await;
        lifecycle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("test: woke in time")
            .expect("test: join");
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves_if_already_cancelled() {
        let lifecycle = Lifecycle::new();
        lifecycle.cancel();
        tokio::time::timeout(Duration::from_millis(50), lifecycle.cancelled())
            .await
            .expect("test: resolves immediately");
    }
}
