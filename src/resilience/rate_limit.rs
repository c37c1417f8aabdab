//! Token-bucket rate limiter shared by every in-flight request.
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use maternal_risk_engine::resilience::{RateLimitConfig, RateLimiter};
//! # #[tokio::main]
//! # async fn main() {
//! let limiter = RateLimiter::new(RateLimitConfig::default());
//!
//! match limiter.acquire(Duration::from_secs(5)).await {
//!     Ok(waited) => println!("token acquired after {waited:?}"),
//!     Err(e) => eprintln!("backpressure: {e}"),
//! }
//! # }
//! ```

use super::clock::{Clock, TokioClock};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Shortest sleep between retries of the critical section.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Limiter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Sustained throughput.
    pub requests_per_minute: u32,
    /// Bucket capacity.
    pub burst_limit: u32,
    /// Pause in token issuance after the provider reports rate limiting.
    pub cooldown_period: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst_limit: 5,
            cooldown_period: Duration::from_secs(10),
        }
    }
}

/// Backpressure signal from the limiter.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// The next token would arrive after the caller's timeout.
    #[error("rate limit exceeded: next token in {wait:?}, queue wait budget {timeout:?}")]
    Exceeded {
        /// Time until the next token would be available.
        wait: Duration,
        /// The queue-wait budget that was exceeded.
        timeout: Duration,
    },
}

/// Mutable bucket state. Only touched while holding the limiter mutex.
#[derive(Debug)]
struct RateLimitState {
    tokens: f64,
    capacity: f64,
    refill_per_second: f64,
    last_refill_at: Instant,
    cooldown_until: Option<Instant>,
}

impl RateLimitState {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill_at);
        self.tokens =
            (self.tokens + elapsed.as_secs_f64() * self.refill_per_second).min(self.capacity);
        self.last_refill_at = now;
    }

    /// Take a token or report how long until one is available.
    fn take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);

        if let Some(until) = self.cooldown_until {
            if until > now {
                return Err(until - now);
            }
            self.cooldown_until = None;
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }

        if self.refill_per_second <= 0.0 {
            return Err(Duration::MAX);
        }
        let seconds = (1.0 - self.tokens) / self.refill_per_second;
        Err(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX))
    }
}

/// Point-in-time view of the bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitSnapshot {
    /// Tokens currently available (fractional).
    pub tokens: f64,
    /// Bucket capacity.
    pub capacity: f64,
    /// Remaining cooldown, if one is active.
    pub cooldown_remaining: Option<Duration>,
}

struct Inner {
    state: Mutex<RateLimitState>,
    clock: Arc<dyn Clock>,
    cooldown_period: Duration,
}

/// Token-bucket rate limiter.
///
/// Capacity is `burst_limit`; tokens refill continuously at
/// `requests_per_minute / 60` per second. All state access goes through one
/// mutex, and the lock is never held across an `.await`.
///
/// Cloning is cheap and every clone shares the same bucket.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl RateLimiter {
    /// Limiter on the tokio clock, starting with a full bucket.
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(TokioClock))
    }

    /// Limiter on an injected clock.
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = f64::from(config.burst_limit);
        let state = RateLimitState {
            tokens: capacity,
            capacity,
            refill_per_second: f64::from(config.requests_per_minute) / 60.0,
            last_refill_at: clock.now(),
            cooldown_until: None,
        };
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                clock,
                cooldown_period: config.cooldown_period,
            }),
        }
    }

    /// Wait for a token for at most `timeout`.
    ///
    /// Returns the time spent waiting.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::Exceeded`] as soon as the next token is known
    /// to arrive after `timeout`; the caller does not sleep in that case.
    pub async fn acquire(&self, timeout: Duration) -> Result<Duration, RateLimitError> {
        let start = self.inner.clock.now();
        loop {
            let now = self.inner.clock.now();
            let outcome = self.inner.state.lock().take(now);
            let waited = now.saturating_duration_since(start);

            let wait = match outcome {
                Ok(()) => {
                    debug!(waited_ms = waited.as_millis() as u64, "rate limit token acquired");
                    return Ok(waited);
                }
                Err(wait) => wait,
            };

            let remaining = timeout.saturating_sub(waited);
            if wait > remaining {
                warn!(
                    wait_ms = wait.as_millis() as u64,
                    timeout_ms = timeout.as_millis() as u64,
                    "rate limit exceeded"
                );
                return Err(RateLimitError::Exceeded { wait, timeout });
            }

            self.inner.clock.sleep(wait.max(MIN_WAIT)).await;
        }
    }

    /// Take a token only if one is available now.
    pub fn try_acquire(&self) -> bool {
        let now = self.inner.clock.now();
        self.inner.state.lock().take(now).is_ok()
    }

    /// Block token issuance for the configured cooldown period.
    ///
    /// Extends, never shortens, an active cooldown.
    pub fn trigger_cooldown(&self) {
        let now = self.inner.clock.now();
        let until = now + self.inner.cooldown_period;
        let mut state = self.inner.state.lock();
        state.cooldown_until = Some(state.cooldown_until.map_or(until, |c| c.max(until)));
        warn!(
            cooldown_ms = self.inner.cooldown_period.as_millis() as u64,
            "provider rate limited, token issuance paused"
        );
    }

    /// Current bucket contents.
    pub fn snapshot(&self) -> RateLimitSnapshot {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();
        state.refill(now);
        RateLimitSnapshot {
            tokens: state.tokens,
            capacity: state.capacity,
            cooldown_remaining: state
                .cooldown_until
                .filter(|until| *until > now)
                .map(|until| until - now),
        }
    }
}
