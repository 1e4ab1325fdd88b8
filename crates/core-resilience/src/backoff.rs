//! Retry policies and backoff delay calculation
//!
//! A [`RetryPolicy`] bounds how many attempts an operation gets and how long
//! to wait between them. The policy never sleeps by itself; callers ask for
//! [`RetryPolicy::delay_for`] and decide how to wait.
//!
//! # Example
//!
//! ```
//! use b2lift_core_resilience::backoff::{BackoffStrategy, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy {
//!     max_attempts: 5,
//!     initial_delay: Duration::from_millis(100),
//!     max_delay: Duration::from_secs(2),
//!     backoff: BackoffStrategy::Exponential,
//!     ..Default::default()
//! };
//!
//! assert_eq!(policy.delay_for(1), Duration::from_millis(100));
//! assert_eq!(policy.delay_for(3), Duration::from_millis(400));
//! assert_eq!(policy.delay_for(10), Duration::from_secs(2));
//! ```

use rand::Rng;
use std::time::Duration;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts (the first try included)
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_delay: Duration,

    /// Upper bound for any single backoff delay
    pub max_delay: Duration,

    /// Backoff strategy to use
    pub backoff: BackoffStrategy,

    /// Jitter factor (0.0-1.0), only used by `ExponentialWithJitter`
    pub jitter_factor: f64,

    /// How many times a single borrow may trigger reauthorization
    pub max_reauthorizations: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff: BackoffStrategy::ExponentialWithJitter,
            jitter_factor: 0.2,
            max_reauthorizations: 3,
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits between attempts. Useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff: BackoffStrategy::Fixed,
            jitter_factor: 0.0,
            ..Default::default()
        }
    }

    /// Delay to wait after the `attempt`-th failure (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_delay = match self.backoff {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Linear => self.initial_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential | BackoffStrategy::ExponentialWithJitter => {
                // 2^31 is already far beyond any sane max_delay
                let multiplier = 2_u32.saturating_pow((attempt - 1).min(31));
                self.initial_delay.saturating_mul(multiplier)
            }
        };

        let capped_delay = base_delay.min(self.max_delay);

        if matches!(self.backoff, BackoffStrategy::ExponentialWithJitter)
            && self.jitter_factor > 0.0
        {
            let jitter = rand::rng().random_range(0.0..self.jitter_factor);
            let jittered = capped_delay.as_secs_f64() * (1.0 + jitter);
            Duration::from_secs_f64(jittered).min(self.max_delay)
        } else {
            capped_delay
        }
    }

    /// Whether another attempt is allowed after `attempts` have been made
    pub fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Backoff strategy for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,

    /// Linear increase in delay
    Linear,

    /// Exponential increase in delay (2^n)
    Exponential,

    /// Exponential with random jitter to prevent thundering herd
    ExponentialWithJitter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_has_ten_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert!(policy.allows_another(9));
        assert!(!policy.allows_another(10));
    }

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            backoff: BackoffStrategy::Exponential,
            ..Default::default()
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff: BackoffStrategy::Exponential,
            ..Default::default()
        };

        assert_eq!(policy.delay_for(8), Duration::from_secs(5));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_cap() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            backoff: BackoffStrategy::ExponentialWithJitter,
            jitter_factor: 0.5,
            ..Default::default()
        };

        for attempt in 1..=10 {
            let delay = policy.delay_for(attempt);
            assert!(delay <= Duration::from_millis(300));
            assert!(delay >= policy.initial_delay);
        }
    }

    #[test]
    fn test_linear_and_fixed() {
        let linear = RetryPolicy {
            initial_delay: Duration::from_millis(50),
            backoff: BackoffStrategy::Linear,
            ..Default::default()
        };
        assert_eq!(linear.delay_for(3), Duration::from_millis(150));

        let fixed = RetryPolicy::immediate(4);
        assert_eq!(fixed.delay_for(3), Duration::ZERO);
        assert_eq!(fixed.max_attempts, 4);
    }
}
