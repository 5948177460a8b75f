use std::time::Duration;

use hyperjob_core::config::{RetryConfig, MAX_RETRY_ATTEMPTS};
use hyperjob_core::{BackoffStrategy, HyperjobError};
use rand::Rng;

use crate::error::OperationError;

/// Bounded retry policy for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. 1 means no retries.
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
    /// When set, only errors matching one of these are retried.
    pub retry_on: Option<Vec<String>>,
    /// Errors matching any of these are never retried.
    pub never_retry_on: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(c: &RetryConfig) -> Self {
        Self {
            max_attempts: c.max_attempts,
            strategy: c.strategy,
            initial_delay: Duration::from_millis(c.initial_delay_ms),
            max_delay: Duration::from_millis(c.max_delay_ms),
            jitter: c.jitter,
            retry_on: c.retry_on.clone(),
            never_retry_on: c.never_retry_on.clone(),
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        strategy: BackoffStrategy,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_attempts,
            strategy,
            initial_delay,
            max_delay,
            jitter: true,
            retry_on: None,
            never_retry_on: Vec::new(),
        }
    }

    /// Single attempt, no retries.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn retry_on<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retry_on = Some(categories.into_iter().map(Into::into).collect());
        self
    }

    pub fn never_retry_on<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.never_retry_on = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<(), HyperjobError> {
        if self.max_attempts == 0 || self.max_attempts > MAX_RETRY_ATTEMPTS {
            return Err(HyperjobError::InvalidValue {
                field: "max_attempts".into(),
                reason: format!("must be within 1..={MAX_RETRY_ATTEMPTS}"),
            });
        }
        if self.initial_delay > self.max_delay {
            return Err(HyperjobError::InvalidValue {
                field: "initial_delay".into(),
                reason: "must not exceed max_delay".into(),
            });
        }
        Ok(())
    }

    /// Delay after `failed_attempt` failed, before jitter. Always capped at
    /// `max_delay`.
    pub fn base_delay(&self, failed_attempt: u32) -> Duration {
        let n = failed_attempt.max(1);
        let factor = match self.strategy {
            BackoffStrategy::Linear => n,
            BackoffStrategy::Exponential => 2u32.saturating_pow(n - 1),
            BackoffStrategy::Fibonacci => fibonacci(n),
        };
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay after `failed_attempt` failed, with jitter when enabled.
    pub fn next_delay(&self, failed_attempt: u32) -> Duration {
        let base = self.base_delay(failed_attempt);
        if self.jitter {
            apply_jitter(base)
        } else {
            base
        }
    }

    /// Explicit marker first, then the deny-list, then the allow-list.
    pub fn is_retryable(&self, err: &OperationError) -> bool {
        if let Some(marked) = err.retryable_override() {
            return marked;
        }
        if self.never_retry_on.iter().any(|p| matches_pattern(p, err)) {
            return false;
        }
        match &self.retry_on {
            None => true,
            Some(allowed) => allowed.iter().any(|p| matches_pattern(p, err)),
        }
    }
}

/// Scale `delay` by a uniform factor in [0.5, 1.5).
pub fn apply_jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.5..1.5);
    delay.mul_f64(factor)
}

/// fib(1) = fib(2) = 1, saturating.
fn fibonacci(n: u32) -> u32 {
    let (mut a, mut b) = (1u32, 1u32);
    for _ in 2..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    b
}

/// A pattern matches the category exactly (case-insensitive) or appears in
/// the message.
fn matches_pattern(pattern: &str, err: &OperationError) -> bool {
    err.category.eq_ignore_ascii_case(pattern) || err.message.contains(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(strategy: BackoffStrategy) -> RetryPolicy {
        RetryPolicy::new(10, strategy, Duration::from_secs(1), Duration::from_secs(30))
            .without_jitter()
    }

    fn secs(p: &RetryPolicy, attempts: &[u32]) -> Vec<u64> {
        attempts.iter().map(|a| p.base_delay(*a).as_secs()).collect()
    }

    #[test]
    fn exponential_doubles_and_caps() {
        let p = policy(BackoffStrategy::Exponential);
        assert_eq!(secs(&p, &[1, 2, 3, 4, 5, 6, 10]), vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn linear_grows_by_initial() {
        let p = policy(BackoffStrategy::Linear);
        assert_eq!(secs(&p, &[1, 2, 3, 40]), vec![1, 2, 3, 30]);
    }

    #[test]
    fn fibonacci_sequence() {
        let p = policy(BackoffStrategy::Fibonacci);
        assert_eq!(secs(&p, &[1, 2, 3, 4, 5, 6, 7, 9]), vec![1, 1, 2, 3, 5, 8, 13, 30]);
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        let p = policy(BackoffStrategy::Exponential);
        assert_eq!(p.base_delay(u32::MAX), Duration::from_secs(30));
        let p = policy(BackoffStrategy::Fibonacci);
        assert_eq!(p.base_delay(500), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(10);
        for _ in 0..1_000 {
            let d = apply_jitter(base);
            assert!(d >= Duration::from_secs(5), "{d:?}");
            assert!(d < Duration::from_secs(15), "{d:?}");
        }
    }

    #[test]
    fn classification_precedence() {
        let p = RetryPolicy::default()
            .retry_on(["network", "timeout"])
            .never_retry_on(["permission_denied"]);

        assert!(p.is_retryable(&OperationError::new("network", "reset by peer")));
        assert!(!p.is_retryable(&OperationError::new("invalid_input", "bad id")));
        assert!(!p.is_retryable(&OperationError::new("permission_denied", "nope")));
        // Pattern found in the message counts too.
        assert!(p.is_retryable(&OperationError::new("io", "read timeout after 5s")));
        // Markers beat both lists.
        assert!(p.is_retryable(&OperationError::transient("permission_denied", "token refresh")));
        assert!(!p.is_retryable(&OperationError::permanent("network", "host blocked")));
    }

    #[test]
    fn no_allow_list_retries_everything_not_denied() {
        let p = RetryPolicy::default().never_retry_on(["invalid_input"]);
        assert!(p.is_retryable(&OperationError::new("whatever", "x")));
        assert!(!p.is_retryable(&OperationError::new("INVALID_INPUT", "x")));
    }

    #[test]
    fn validation_bounds() {
        assert!(RetryPolicy::default().validate().is_ok());
        let mut p = RetryPolicy::default();
        p.max_attempts = 0;
        assert!(p.validate().is_err());
        p.max_attempts = 11;
        assert!(p.validate().is_err());
        let p = RetryPolicy::new(3, BackoffStrategy::Linear, Duration::from_secs(5), Duration::from_secs(1));
        assert!(p.validate().is_err());
    }
}
