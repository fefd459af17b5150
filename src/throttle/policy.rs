//! Throttling thresholds and delays.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use customtabs_connection::ThrottlePolicy;
//!
//! let policy = ThrottlePolicy::default()
//!     .with_ban_threshold(20)
//!     .with_ban_duration(Duration::from_secs(60));
//!
//! assert_eq!(policy.delay_for_streak(1), Duration::from_millis(100));
//! assert_eq!(policy.delay_for_streak(3), Duration::from_millis(400));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_MIN_DELAY_MS: u64 = 100;
const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
const DEFAULT_BAN_THRESHOLD: u32 = 100;
const DEFAULT_SUCCESS_CREDIT: f64 = 2.0;
const DEFAULT_MAX_CREDIT: f64 = 10.0;
const DEFAULT_BAN_DURATION_MS: u64 = 7 * 24 * 60 * 60 * 1000;
const DEFAULT_FORGET_AFTER_MS: u64 = 14 * 24 * 60 * 60 * 1000;

// ============================================================================
// ThrottlePolicy
// ============================================================================

/// Tunable throttling policy.
///
/// Durations are stored in milliseconds so the policy can be loaded from a
/// flat JSON document; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThrottlePolicy {
    /// Delay after the first unmatched request.
    pub min_delay_ms: u64,

    /// Upper bound of the doubling backoff.
    pub max_delay_ms: u64,

    /// Unmatched-request debt at which the UID is banned.
    pub ban_threshold: u32,

    /// Credit earned back when a speculated URL is actually launched.
    pub success_credit: f64,

    /// Highest credit a UID can bank.
    pub max_credit: f64,

    /// How long a ban lasts.
    pub ban_duration_ms: u64,

    /// Records idle for longer than this are discarded on load.
    pub forget_after_ms: u64,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            min_delay_ms: DEFAULT_MIN_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            ban_threshold: DEFAULT_BAN_THRESHOLD,
            success_credit: DEFAULT_SUCCESS_CREDIT,
            max_credit: DEFAULT_MAX_CREDIT,
            ban_duration_ms: DEFAULT_BAN_DURATION_MS,
            forget_after_ms: DEFAULT_FORGET_AFTER_MS,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ThrottlePolicy {
    /// Parses a policy from JSON and validates it.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the document is malformed
    /// - [`Error::Config`] if a value is out of range
    pub fn from_json(json: &str) -> Result<Self> {
        let policy: Self = serde_json::from_str(json)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Sets the first backoff delay.
    #[inline]
    #[must_use]
    pub fn with_min_delay(mut self, delay: Duration) -> Self {
        self.min_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Sets the backoff ceiling.
    #[inline]
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Sets the ban threshold.
    #[inline]
    #[must_use]
    pub fn with_ban_threshold(mut self, threshold: u32) -> Self {
        self.ban_threshold = threshold;
        self
    }

    /// Sets the ban duration.
    #[inline]
    #[must_use]
    pub fn with_ban_duration(mut self, duration: Duration) -> Self {
        self.ban_duration_ms = duration.as_millis() as u64;
        self
    }

    /// Sets the idle time after which a record is forgotten.
    #[inline]
    #[must_use]
    pub fn with_forget_after(mut self, duration: Duration) -> Self {
        self.forget_after_ms = duration.as_millis() as u64;
        self
    }

    /// Checks that the policy can actually ban and back off.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.ban_threshold == 0 {
            return Err(Error::config("banThreshold must be at least 1"));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(Error::config("minDelayMs must not exceed maxDelayMs"));
        }
        if !(self.success_credit.is_finite() && self.success_credit > 0.0) {
            return Err(Error::config("successCredit must be positive"));
        }
        if !(self.max_credit.is_finite() && self.max_credit >= 0.0) {
            return Err(Error::config("maxCredit must be non-negative"));
        }
        Ok(())
    }
}

// ============================================================================
// Derived Values
// ============================================================================

impl ThrottlePolicy {
    /// Backoff delay after `streak` consecutive unmatched requests.
    ///
    /// Zero for a streak of zero, then `min_delay` doubling per miss up to
    /// `max_delay`.
    #[must_use]
    pub fn delay_for_streak(&self, streak: u32) -> Duration {
        if streak == 0 {
            return Duration::ZERO;
        }
        let shift = (streak - 1).min(32);
        let delay = self
            .min_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Credit floor; reaching it bans the UID.
    #[inline]
    #[must_use]
    pub fn ban_floor(&self) -> f64 {
        -f64::from(self.ban_threshold)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_delays_double() {
        let policy = ThrottlePolicy::default();
        assert_eq!(policy.delay_for_streak(0), Duration::ZERO);
        assert_eq!(policy.delay_for_streak(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_streak(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_streak(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = ThrottlePolicy::default();
        assert_eq!(policy.delay_for_streak(500), Duration::from_secs(10));
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let policy = ThrottlePolicy::from_json(r#"{"banThreshold": 5}"#).expect("valid policy");
        assert_eq!(policy.ban_threshold, 5);
        assert_eq!(policy.min_delay_ms, DEFAULT_MIN_DELAY_MS);
    }

    #[test]
    fn test_from_json_rejects_zero_threshold() {
        let err = ThrottlePolicy::from_json(r#"{"banThreshold": 0}"#).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let policy = ThrottlePolicy::default()
            .with_min_delay(Duration::from_secs(5))
            .with_max_delay(Duration::from_secs(1));
        assert!(policy.validate().is_err());
    }
}
