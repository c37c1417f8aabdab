//! Risk tiers and the score → tier partition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound of every risk score.
pub const MAX_SCORE: f64 = 100.0;

/// Ordered risk classification derived from a numeric score.
///
/// `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    /// Routine antenatal care.
    Low,
    /// Closer monitoring advised.
    Medium,
    /// Specialist review advised.
    High,
    /// Emergency workflow must be triggered.
    Critical,
}

impl RiskTier {
    /// All tiers in ascending order.
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Stable lowercase label used in metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_medium() -> f64 {
    20.0
}

fn default_high() -> f64 {
    40.0
}

fn default_critical() -> f64 {
    60.0
}

/// Lower bounds of the Medium, High and Critical tiers.
///
/// A score equal to a bound belongs to the higher tier. Everything below
/// `medium` is Low, so the partition of `[0, 100]` is total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TierThresholds {
    /// First score classified as Medium.
    #[serde(default = "default_medium")]
    pub medium: f64,
    /// First score classified as High.
    #[serde(default = "default_high")]
    pub high: f64,
    /// First score classified as Critical.
    #[serde(default = "default_critical")]
    pub critical: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            medium: default_medium(),
            high: default_high(),
            critical: default_critical(),
        }
    }
}

impl TierThresholds {
    /// Map a score to its tier.
    ///
    /// # Example
    ///
    /// ```rust
    /// use maternal_risk_engine::scoring::{RiskTier, TierThresholds};
    /// let t = TierThresholds::default();
    /// assert_eq!(t.tier_for(39.0), RiskTier::Medium);
    /// assert_eq!(t.tier_for(40.0), RiskTier::High);
    /// ```
    pub fn tier_for(&self, score: f64) -> RiskTier {
        if score >= self.critical {
            RiskTier::Critical
        } else if score >= self.high {
            RiskTier::High
        } else if score >= self.medium {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }

    /// Check that the bounds are finite, strictly increasing and inside
    /// `(0, 100]`.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the bounds are unusable.
    pub fn check(&self) -> Result<(), String> {
        let bounds = [self.medium, self.high, self.critical];
        if bounds.iter().any(|b| !b.is_finite() || *b <= 0.0 || *b > MAX_SCORE) {
            return Err(format!(
                "tier bounds must lie in (0, {MAX_SCORE}], got {bounds:?}"
            ));
        }
        if !(self.medium < self.high && self.high < self.critical) {
            return Err(format!(
                "tier bounds must be strictly increasing, got {bounds:?}"
            ));
        }
        Ok(())
    }
}

/// Clamp a raw total into `[0, 100]`; NaN maps to 0.
pub fn clamp_score(raw: f64) -> f64 {
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, MAX_SCORE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_integer_score_maps_to_exactly_one_tier() {
        let t = TierThresholds::default();
        let mut previous = RiskTier::Low;
        for score in 0..=100 {
            let tier = t.tier_for(f64::from(score));
            let matching = RiskTier::ALL.iter().filter(|candidate| **candidate == tier).count();
            assert_eq!(matching, 1);
            assert!(tier >= previous, "tiers must be monotonic at {score}");
            previous = tier;
        }
    }

    #[test]
    fn test_boundaries_belong_to_higher_tier() {
        let t = TierThresholds::default();
        assert_eq!(t.tier_for(19.0), RiskTier::Low);
        assert_eq!(t.tier_for(20.0), RiskTier::Medium);
        assert_eq!(t.tier_for(39.0), RiskTier::Medium);
        assert_eq!(t.tier_for(40.0), RiskTier::High);
        assert_eq!(t.tier_for(59.0), RiskTier::High);
        assert_eq!(t.tier_for(60.0), RiskTier::Critical);
        assert_eq!(t.tier_for(100.0), RiskTier::Critical);
    }

    #[test]
    fn test_fractional_scores_just_below_boundary() {
        let t = TierThresholds::default();
        assert_eq!(t.tier_for(39.999), RiskTier::Medium);
        assert_eq!(t.tier_for(0.0), RiskTier::Low);
    }

    #[test]
    fn test_check_rejects_unordered_bounds() {
        let t = TierThresholds {
            medium: 40.0,
            high: 20.0,
            critical: 60.0,
        };
        assert!(t.check().is_err());
    }

    #[test]
    fn test_check_rejects_out_of_range_bounds() {
        let t = TierThresholds {
            medium: 0.0,
            high: 50.0,
            critical: 120.0,
        };
        assert!(t.check().is_err());
    }

    #[test]
    fn test_default_bounds_pass_check() {
        assert!(TierThresholds::default().check().is_ok());
    }

    #[test]
    fn test_clamp_score_handles_nan_and_overflow() {
        assert_eq!(clamp_score(f64::NAN), 0.0);
        assert_eq!(clamp_score(-5.0), 0.0);
        assert_eq!(clamp_score(250.0), 100.0);
        assert_eq!(clamp_score(45.0), 45.0);
    }

    #[test]
    fn test_tier_ordering() {
        assert!(RiskTier::Critical > RiskTier::High);
        assert!(RiskTier::Medium > RiskTier::Low);
    }
}
