use std::time::Duration;

use rand::Rng;

use crate::error::TransportErrorKind;

const DEFAULT_MAX_RETRIES: usize = 5;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// What went wrong on the attempt that just finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Configuration,
    Authentication,
    Network(TransportErrorKind),
    Timeout,
    UnexpectedStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GiveUpReason {
    /// The failure is not one this strategy retries.
    NotRetryable,
    /// The failure is retryable but the retry budget is spent.
    Exhausted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp(GiveUpReason),
}

impl RetryDecision {
    pub const fn is_retry(self) -> bool {
        matches!(self, Self::Retry { .. })
    }
}

/// Per-request retry policy.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum RetryStrategy {
    /// Every failure is final.
    #[default]
    None,
    ExponentialBackoff(ExponentialBackoff),
}

impl RetryStrategy {
    pub fn exponential_backoff(max_retries: usize, retry_on_timeout: bool) -> Self {
        Self::ExponentialBackoff(ExponentialBackoff::new(max_retries, retry_on_timeout))
    }

    /// Decides what to do after `attempt` (1-based) failed with `failure`.
    pub fn on_failure(&self, attempt: usize, failure: FailureKind) -> RetryDecision {
        match self {
            Self::None => RetryDecision::GiveUp(GiveUpReason::NotRetryable),
            Self::ExponentialBackoff(backoff) => backoff.on_failure(attempt, failure),
        }
    }

    pub fn max_attempts(&self) -> usize {
        match self {
            Self::None => 1,
            Self::ExponentialBackoff(backoff) => backoff.max_retries.saturating_add(1),
        }
    }
}

/// Retries transport failures with a doubling delay.
///
/// Status rejections and configuration errors are never retried. Timeouts are
/// retried only when `retry_on_timeout` is set, and authentication failures
/// only when `retry_on_authentication_failure` is set.
#[derive(Clone, Debug, PartialEq)]
pub struct ExponentialBackoff {
    max_retries: usize,
    retry_on_timeout: bool,
    retry_on_authentication_failure: bool,
    base_delay: Duration,
    max_delay: Duration,
    jitter_ratio: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, false)
    }
}

impl ExponentialBackoff {
    pub fn new(max_retries: usize, retry_on_timeout: bool) -> Self {
        Self {
            max_retries,
            retry_on_timeout,
            retry_on_authentication_failure: false,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_ratio: 0.0,
        }
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        if self.max_delay < self.base_delay {
            self.max_delay = self.base_delay;
        }
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay.max(self.base_delay);
        self
    }

    pub fn jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    pub fn retry_on_authentication_failure(mut self, retry: bool) -> Self {
        self.retry_on_authentication_failure = retry;
        self
    }

    pub fn max_retries_value(&self) -> usize {
        self.max_retries
    }

    pub fn retries_on_timeout(&self) -> bool {
        self.retry_on_timeout
    }

    fn is_retryable(&self, failure: FailureKind) -> bool {
        match failure {
            FailureKind::Network(_) => true,
            FailureKind::Timeout => self.retry_on_timeout,
            FailureKind::Authentication => self.retry_on_authentication_failure,
            FailureKind::UnexpectedStatus | FailureKind::Configuration => false,
        }
    }

    pub fn on_failure(&self, attempt: usize, failure: FailureKind) -> RetryDecision {
        if !self.is_retryable(failure) {
            return RetryDecision::GiveUp(GiveUpReason::NotRetryable);
        }
        if attempt > self.max_retries {
            return RetryDecision::GiveUp(GiveUpReason::Exhausted);
        }
        RetryDecision::Retry {
            delay: self.delay_for_attempt(attempt),
        }
    }

    /// `base_delay * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as u32;
        let delay = self
            .base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay);
        self.apply_jitter(delay)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_ratio <= f64::EPSILON {
            return delay;
        }

        let delay_ms = delay.as_millis().min(u64::MAX as u128) as u64;
        if delay_ms <= 1 {
            return delay;
        }
        let max_delay_ms = self.max_delay.as_millis().min(u64::MAX as u128) as u64;

        let jitter_span = ((delay_ms as f64) * self.jitter_ratio).round().max(1.0) as u64;
        let low = delay_ms.saturating_sub(jitter_span);
        let high = delay_ms.saturating_add(jitter_span).max(low);
        let mut rng = rand::rng();
        let sampled_ms = rng.random_range(low..=high).min(max_delay_ms.max(1));
        Duration::from_millis(sampled_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ExponentialBackoff, FailureKind, GiveUpReason, RetryDecision, RetryStrategy};
    use crate::error::TransportErrorKind;

    #[test]
    fn jittered_delay_never_exceeds_configured_max_delay() {
        let backoff = ExponentialBackoff::new(5, false)
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(120))
            .jitter_ratio(1.0);

        for _ in 0..256 {
            assert!(backoff.delay_for_attempt(3) <= Duration::from_millis(120));
        }
    }

    #[test]
    fn delays_double_from_the_base_delay() {
        let backoff = ExponentialBackoff::new(5, false).base_delay(Duration::from_millis(50));
        let delays: Vec<_> = (1..=4).map(|k| backoff.delay_for_attempt(k)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(50),
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]
        );
    }

    #[test]
    fn timeout_gives_up_immediately_unless_enabled() {
        let strict = RetryStrategy::exponential_backoff(3, false);
        assert_eq!(
            strict.on_failure(1, FailureKind::Timeout),
            RetryDecision::GiveUp(GiveUpReason::NotRetryable)
        );

        let lenient = RetryStrategy::exponential_backoff(3, true);
        assert!(lenient.on_failure(1, FailureKind::Timeout).is_retry());
    }

    #[test]
    fn unexpected_status_is_never_retried() {
        let strategy = RetryStrategy::exponential_backoff(10, true);
        assert_eq!(
            strategy.on_failure(1, FailureKind::UnexpectedStatus),
            RetryDecision::GiveUp(GiveUpReason::NotRetryable)
        );
    }

    #[test]
    fn network_failures_exhaust_after_max_retries() {
        let strategy = RetryStrategy::exponential_backoff(2, false);
        let failure = FailureKind::Network(TransportErrorKind::Connect);
        assert!(strategy.on_failure(1, failure).is_retry());
        assert!(strategy.on_failure(2, failure).is_retry());
        assert_eq!(
            strategy.on_failure(3, failure),
            RetryDecision::GiveUp(GiveUpReason::Exhausted)
        );
        assert_eq!(strategy.max_attempts(), 3);
    }

    #[test]
    fn authentication_failures_retry_only_when_enabled() {
        let default = ExponentialBackoff::new(3, false);
        assert_eq!(
            default.on_failure(1, FailureKind::Authentication),
            RetryDecision::GiveUp(GiveUpReason::NotRetryable)
        );
        let enabled = default.retry_on_authentication_failure(true);
        assert!(enabled.on_failure(1, FailureKind::Authentication).is_retry());
    }

    #[test]
    fn no_retry_strategy_gives_up_on_everything() {
        let failure = FailureKind::Network(TransportErrorKind::Read);
        assert_eq!(
            RetryStrategy::None.on_failure(1, failure),
            RetryDecision::GiveUp(GiveUpReason::NotRetryable)
        );
        assert_eq!(RetryStrategy::None.max_attempts(), 1);
    }
}
