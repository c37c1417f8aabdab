//! Exponential backoff between primary-model attempts.

use rand::Rng;
use std::time::Duration;

/// Largest fraction added by jitter.
pub const MAX_JITTER_FRACTION: f64 = 0.25;

/// Backoff schedule.
///
/// The delay before attempt `n ≥ 2` is `initial_delay × 2^(n-2)`, capped at
/// `max_delay`. Attempt 1 and the fallback attempt have no delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before attempt 2.
    pub initial_delay: Duration,
    /// Upper bound on the un-jittered delay.
    pub max_delay: Duration,
    /// Add up to +25% random jitter.
    pub jitter: bool,
}

impl BackoffPolicy {
    /// Policy without jitter.
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            jitter: false,
        }
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Deterministic delay before `attempt` (1-based).
    ///
    /// # Panics
    ///
    /// This function never panics; the exponent saturates.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(31);
        let factor = 1_u32 << exponent;
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before `attempt`, jittered if enabled.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let fraction = rand::thread_rng().gen_range(0.0..=MAX_JITTER_FRACTION);
        base + base.mul_f64(fraction)
    }

    /// Upper bound of all backoff sleeps across `primary_attempts`, jitter
    /// included. Used to derive the overall request deadline.
    pub fn max_total_delay(&self, primary_attempts: u32) -> Duration {
        let total: Duration = (2..=primary_attempts).map(|n| self.base_delay(n)).sum();
        if self.jitter {
            total + total.mul_f64(MAX_JITTER_FRACTION)
        } else {
            total
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(100), Duration::from_millis(1_000))
    }

    #[test]
    fn test_first_attempt_has_no_delay() {
        assert_eq!(policy().delay_before(1), Duration::ZERO);
        assert_eq!(policy().delay_before(0), Duration::ZERO);
    }

    #[test]
    fn test_delay_doubles_from_initial() {
        let p = policy();
        assert_eq!(p.delay_before(2), Duration::from_millis(100));
        assert_eq!(p.delay_before(3), Duration::from_millis(200));
        assert_eq!(p.delay_before(4), Duration::from_millis(400));
        assert_eq!(p.delay_before(5), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let p = policy();
        assert_eq!(p.delay_before(6), Duration::from_millis(1_000));
        assert_eq!(p.delay_before(60), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let p = policy().with_jitter(true);
        for _ in 0..200 {
            let d = p.delay_before(3);
            assert!(d >= Duration::from_millis(200), "{d:?}");
            assert!(d <= Duration::from_millis(250), "{d:?}");
        }
    }

    #[test]
    fn test_max_total_delay_sums_caps() {
        // 100 + 200 + 400
        assert_eq!(policy().max_total_delay(4), Duration::from_millis(700));
        assert_eq!(policy().max_total_delay(1), Duration::ZERO);
        assert_eq!(
            policy().with_jitter(true).max_total_delay(4),
            Duration::from_millis(875)
        );
    }
}
