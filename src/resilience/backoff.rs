//! # Exponential Backoff
//!
//! One shared retry-delay policy used everywhere a bounded retry loop is
//! needed: optimistic-concurrency `modify` retries, and reaper polling after
//! transient queue failures. Delays grow exponentially, are capped, and get
//! a randomized jitter so contending writers don't retry in lockstep.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded exponential backoff policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts before giving up, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay_ms: u64,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
    /// Maximum extra delay as a fraction of the computed delay.
    pub jitter_max_percentage: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 10,
            multiplier: 2.0,
            max_delay_ms: 5_000, // 5 seconds
            jitter_max_percentage: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given zero-based failed attempt,
    /// with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.jittered(self.raw_delay_ms(attempt)))
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    fn raw_delay_ms(&self, attempt: u32) -> u64 {
        let exp = self.base_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        exp.min(self.max_delay_ms as f64) as u64
    }

    fn jittered(&self, delay_ms: u64) -> u64 {
        let jitter = fastrand::f64() * self.jitter_max_percentage;
        (delay_ms as f64 * (1.0 + jitter)) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter_max_percentage: 0.0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_delays_grow_and_cap() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for(2), Duration::from_millis(40));
        // Far past the cap
        assert_eq!(policy.delay_for(30), Duration::from_millis(5_000));
    }

    #[test]
    fn test_should_retry_bound() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..no_jitter()
        };
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn test_jitter_bounded() {
        let policy = RetryPolicy {
            jitter_max_percentage: 0.5,
            ..RetryPolicy::default()
        };
        for attempt in 0..5 {
            let raw = policy.raw_delay_ms(attempt);
            let delay = policy.delay_for(attempt).as_millis() as u64;
            assert!(delay >= raw);
            assert!(delay <= (raw as f64 * 1.5) as u64 + 1);
        }
    }
}
