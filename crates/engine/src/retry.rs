//! Exponential backoff policy for per-backend retries.
//!
//! Delays are timer-based (`tokio::time::sleep` at the call site), never a
//! blocking sleep, so the scheduling model holds on a cooperative runtime.

use pixelmill_config::RetryConfig;
use std::time::Duration;

/// Backoff schedule: `base * 2^(attempt-1)`, capped at a maximum delay.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl BackoffPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    /// Delay to wait after the given 1-based attempt fails.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let multiplier = 1_u64 << shift;
        let calculated = self.base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(calculated.min(self.max_delay_ms))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(500, 30_000)
    }
}

impl From<&RetryConfig> for BackoffPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.base_delay_ms, config.max_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_attempt_waits_base_delay() {
        let policy = BackoffPolicy::new(250, 8_000);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(250));
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = BackoffPolicy::new(100, 10_000);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let policy = BackoffPolicy::new(1_000, 4_000);
        assert_eq!(policy.delay_for_attempt(6), Duration::from_millis(4_000));
    }

    #[test]
    fn test_from_retry_config() {
        let config = RetryConfig {
            base_delay_ms: 750,
            max_delay_ms: 12_000,
            max_retries_per_backend: 2,
        };
        let policy = BackoffPolicy::from(&config);
        assert_eq!(policy.base_delay_ms(), 750);
        assert_eq!(policy.max_delay_ms(), 12_000);
    }

    proptest! {
        // The delay never exceeds the cap and never drops below zero attempts'
        // worth of waiting, for any attempt number.
        #[test]
        fn prop_delay_bounded_by_max(
            base in 1u64..5_000,
            max in 5_000u64..120_000,
            attempt in 1u32..64,
        ) {
            let policy = BackoffPolicy::new(base, max);
            let delay = policy.delay_for_attempt(attempt);
            prop_assert!(delay <= Duration::from_millis(max));
        }

        // Doubling holds exactly while under the cap.
        #[test]
        fn prop_delay_monotonic_in_attempt(
            base in 1u64..1_000,
            attempt in 1u32..20,
        ) {
            let policy = BackoffPolicy::new(base, u64::MAX);
            let a = policy.delay_for_attempt(attempt);
            let b = policy.delay_for_attempt(attempt + 1);
            prop_assert!(b >= a);
        }
    }
}
