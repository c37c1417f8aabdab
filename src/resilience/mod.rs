//! # Stage: Resilience Primitives
//!
//! ## Responsibility
//! Time, throughput and retry pacing for calls to the AI provider:
//! an injectable [`Clock`], the shared token-bucket [`RateLimiter`] and the
//! exponential [`BackoffPolicy`].
//!
//! ## Guarantees
//! - `0 ≤ tokens ≤ capacity` at all times
//! - Bucket state is only read or written under one mutex, never held across
//!   an `.await`
//! - Backoff is deterministic unless jitter is enabled
//!
//! ## NOT Responsible For
//! - Deciding whether an error is retryable (that belongs to `gateway`)
//! - Distributed or multi-process rate limits

pub mod backoff;
pub mod clock;
pub mod rate_limit;

pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, TokioClock};
pub use rate_limit::{RateLimitConfig, RateLimitError, RateLimitSnapshot, RateLimiter};
