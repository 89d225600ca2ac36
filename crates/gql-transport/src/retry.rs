//! Bounded exponential-backoff retries.

use crate::{AttemptOutcome, CircuitBreaker, ServiceFailure};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry decision result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after a delay.
    RetryAfter(Duration),
    /// Do not retry.
    DoNotRetry,
}

/// Retry tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_base: f64,
    pub backoff_unit: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2.0,
            backoff_unit: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based): `unit * base^retry`,
    /// capped at `max_backoff`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.backoff_unit.as_secs_f64() * self.backoff_base.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Runs an operation, retrying transient failures.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Decide whether to retry after `attempts_made` attempts ended in
    /// `failure`.
    #[must_use]
    pub fn decide(&self, failure: &ServiceFailure, attempts_made: u32) -> RetryDecision {
        if !failure.is_transient() {
            return RetryDecision::DoNotRetry;
        }
        if attempts_made > self.config.max_retries {
            return RetryDecision::DoNotRetry;
        }
        RetryDecision::RetryAfter(self.config.backoff(attempts_made))
    }

    /// Run `attempt` until it succeeds, fails permanently, or retries run
    /// out. Every attempt first takes a permit from `breaker`; once the
    /// circuit is open the loop ends with [`ServiceFailure::CircuitOpen`]
    /// without calling `attempt` again.
    ///
    /// `attempt` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        breaker: &CircuitBreaker,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<T, ServiceFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ServiceFailure>>,
    {
        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(ServiceFailure::Cancelled);
            }

            let permit = breaker.try_acquire()?;
            attempts += 1;
            let result = attempt(attempts).await;
            permit.record(AttemptOutcome::of(&result));

            let failure = match result {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };

            match self.decide(&failure, attempts) {
                RetryDecision::RetryAfter(delay) => {
                    debug!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "transient failure, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ServiceFailure::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::DoNotRetry => {
                    if failure.is_transient() {
                        warn!(attempts, error = %failure, "retries exhausted");
                    }
                    return Err(failure);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BreakerConfig, BreakerState};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            backoff_base: 2.0,
            backoff_unit: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
        })
    }

    fn unavailable() -> ServiceFailure {
        ServiceFailure::HttpStatus {
            status: 503,
            body: String::new(),
            transient: true,
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let config = RetryConfig::default();
        assert_eq!(config.backoff(1), Duration::from_secs(2));
        assert_eq!(config.backoff(2), Duration::from_secs(4));
        assert_eq!(config.backoff(3), Duration::from_secs(8));
        assert_eq!(config.backoff(10), Duration::from_secs(30));
        assert_eq!(config.backoff(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_decide() {
        let policy = RetryPolicy::new(RetryConfig::default());
        assert_eq!(
            policy.decide(&unavailable(), 1),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(
            policy.decide(&unavailable(), 3),
            RetryDecision::RetryAfter(Duration::from_secs(8))
        );
        assert_eq!(policy.decide(&unavailable(), 4), RetryDecision::DoNotRetry);
        assert_eq!(
            policy.decide(&ServiceFailure::graphql(vec!["bad".into()]), 1),
            RetryDecision::DoNotRetry
        );
        assert_eq!(
            policy.decide(&ServiceFailure::Cancelled, 1),
            RetryDecision::DoNotRetry
        );
    }

    #[tokio::test]
    async fn test_run_retries_until_success() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        let calls = AtomicU32::new(0);

        let result = fast(3)
            .run(&breaker, &CancellationToken::new(), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(unavailable())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_run_returns_last_failure_when_exhausted() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = fast(2)
            .run(&breaker, &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(unavailable()) }
            })
            .await;

        assert_eq!(result.unwrap_err().status(), Some(503));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_stops_when_breaker_opens() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 2,
            break_duration: Duration::from_secs(60),
        });
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = fast(5)
            .run(&breaker, &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(unavailable()) }
            })
            .await;

        assert!(matches!(result, Err(ServiceFailure::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(breaker.state(), BreakerState::Open { .. }));
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(RetryConfig {
            backoff_unit: Duration::from_secs(60),
            max_backoff: Duration::from_secs(60),
            ..RetryConfig::default()
        });

        let trigger = cancel.clone();
        let result: Result<(), _> = policy
            .run(&breaker, &cancel, |_| {
                trigger.cancel();
                async { Err(unavailable()) }
            })
            .await;

        assert!(matches!(result, Err(ServiceFailure::Cancelled)));
    }

    #[tokio::test]
    async fn test_precancelled_makes_no_attempt() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = fast(3)
            .run(&breaker, &cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
