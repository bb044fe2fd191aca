//! Retry policies for failed jobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The two backoff types recognized by job submission options (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    Fixed,
    Exponential,
}

/// `{backoff.type, backoff.delay}` as accepted on submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(rename = "type")]
    pub kind: BackoffType,
    pub delay: u64,
}

impl BackoffPolicy {
    pub fn fixed(delay_ms: u64) -> Self {
        Self {
            kind: BackoffType::Fixed,
            delay: delay_ms,
        }
    }

    pub fn exponential(delay_ms: u64) -> Self {
        Self {
            kind: BackoffType::Exponential,
            delay: delay_ms,
        }
    }
}

/// Retry strategy enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryStrategy {
    /// No retry.
    None,
    /// Fixed delay between retries.
    Fixed,
    /// Exponential backoff: `delay * 2^(attempt-1)`.
    Exponential,
}

/// Retry policy configuration, derived from a job's submission-time
/// `{backoff.type, backoff.delay}` plus its `attempts` cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub strategy: RetryStrategy,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    /// Caps the computed delay; default is unbounded (`u64::MAX`).
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, 1000)
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            strategy: RetryStrategy::None,
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    pub fn fixed(max_retries: u32, delay_ms: u64) -> Self {
        Self {
            strategy: RetryStrategy::Fixed,
            max_retries,
            base_delay_ms: delay_ms,
            max_delay_ms: u64::MAX,
        }
    }

    pub fn exponential(max_retries: u32, delay_ms: u64) -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            max_retries,
            base_delay_ms: delay_ms,
            max_delay_ms: u64::MAX,
        }
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Builds a policy from a submission-time backoff option and attempts cap.
    pub fn from_backoff(backoff: BackoffPolicy, max_retries: u32) -> Self {
        match backoff.kind {
            BackoffType::Fixed => Self::fixed(max_retries, backoff.delay),
            BackoffType::Exponential => Self::exponential(max_retries, backoff.delay),
        }
    }

    /// Returns true if another attempt is allowed after this one.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        self.strategy != RetryStrategy::None && attempts_made < self.max_retries
    }

    /// Delay before retrying after the `attempts_made`-th failure
    /// (1-indexed: the delay after the first failure is `delay_for_attempt(1)`).
    ///
    /// Exponential: `base_delay_ms * 2^(attempts_made-1)`, matching the
    /// backoff-monotonicity property: the delay after the k-th failure is
    /// `base * 2^(k-1)`.
    pub fn delay_for_attempt(&self, attempts_made: u32) -> Duration {
        if attempts_made == 0 || self.strategy == RetryStrategy::None {
            return Duration::ZERO;
        }

        let base = match self.strategy {
            RetryStrategy::None => 0,
            RetryStrategy::Fixed => self.base_delay_ms,
            RetryStrategy::Exponential => {
                let exp = attempts_made - 1;
                (self.base_delay_ms as f64 * 2f64.powi(exp as i32)) as u64
            }
        };

        Duration::from_millis(base.min(self.max_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_retry() {
        let policy = RetryPolicy::none();
        assert!(!policy.should_retry(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
    }

    #[test]
    fn fixed_retry() {
        let policy = RetryPolicy::fixed(3, 100);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(100));
    }

    #[test]
    fn exponential_backoff_matches_base_times_two_pow_k_minus_1() {
        let policy = RetryPolicy::exponential(3, 100);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn max_delay_caps_exponential_growth() {
        let policy = RetryPolicy::exponential(10, 1000).with_max_delay(Duration::from_secs(10));
        assert!(policy.delay_for_attempt(10) <= Duration::from_secs(10));
    }

    #[test]
    fn from_backoff_option_builds_matching_policy() {
        let policy = RetryPolicy::from_backoff(BackoffPolicy::exponential(50), 3);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(100));
    }
}
