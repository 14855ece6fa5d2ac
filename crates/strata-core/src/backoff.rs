//! Exponential backoff shared by the sync drain and the health prober.
//!
//! One policy object replaces per-call-site retry loops: callers ask for the
//! delay after `n` failed attempts and whether `n` has exhausted the budget.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Capped exponential backoff: `base * multiplier^(attempts-1)`, at most `cap`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackoffPolicy {
    /// Attempts allowed before an operation is considered terminally failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failure (ms)
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound for any single delay (ms)
    #[serde(default = "default_cap_ms")]
    pub cap_ms: u64,
}

const fn default_max_attempts() -> u32 {
    8
}

const fn default_base_ms() -> u64 {
    1_000
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_cap_ms() -> u64 {
    5 * 60 * 1_000
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_ms: default_base_ms(),
            multiplier: default_multiplier(),
            cap_ms: default_cap_ms(),
        }
    }
}

impl BackoffPolicy {
    /// Near-zero delays for tests.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_ms: 0,
            multiplier: 1.0,
            cap_ms: 0,
        }
    }

    /// Delay to wait after `attempts` consecutive failures.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn delay(&self, attempts: u32) -> Duration {
        if attempts == 0 || self.base_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempts - 1).unwrap_or(i32::MAX);
        let scaled = (self.base_ms as f64) * self.multiplier.max(1.0).powi(exponent);
        let capped = scaled.min(self.cap_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Delay in whole milliseconds, convenient for timestamp arithmetic.
    #[must_use]
    pub fn delay_ms(&self, attempts: u32) -> i64 {
        i64::try_from(self.delay(attempts).as_millis()).unwrap_or(i64::MAX)
    }

    /// Whether `attempts` failures have used up the retry budget.
    #[must_use]
    pub const fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = BackoffPolicy {
            max_attempts: 10,
            base_ms: 100,
            multiplier: 2.0,
            cap_ms: 1_000,
        };
        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
        assert_eq!(policy.delay(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay(40), Duration::from_millis(1_000));
    }

    #[test]
    fn exhausted_at_max_attempts() {
        let policy = BackoffPolicy::immediate(3);
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
        assert_eq!(policy.delay_ms(7), 0);
    }

    #[test]
    fn default_policy_deserializes_from_empty_object() {
        let policy: BackoffPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, BackoffPolicy::default());
    }
}
