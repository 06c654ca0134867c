//! Bounded retries with configurable backoff.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;
use crate::errors::classify_retry;
use relay_walk::CancellationToken;

/// Backoff function mapping an attempt index to the wait before the next
/// attempt.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Always wait the initial delay.
    Fixed,
    /// Wait `initial × attempt`, capped at the maximum delay.
    Linear,
    /// Wait `initial × multiplier^(attempt-1)`, capped at the maximum delay.
    #[default]
    Exponential,
}

/// Retry budget and backoff parameters.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor for exponential backoff.
    pub multiplier: f64,
    /// Backoff function.
    pub backoff: BackoffKind,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            backoff: BackoffKind::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Computes the wait after the given attempt (indexed from one).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffKind::Fixed => self.initial_delay,
            BackoffKind::Linear => {
                let scaled = self.initial_delay.saturating_mul(attempt);
                scaled.min(self.max_delay)
            }
            BackoffKind::Exponential => {
                let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
                let scaled = self.initial_delay.mul_f64(factor.max(0.0));
                scaled.min(self.max_delay)
            }
        }
    }
}

/// Runs fallible operations under a [`RetryPolicy`].
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryManager {
    policy: RetryPolicy,
}

impl RetryManager {
    /// Creates a manager with the given policy.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Returns the policy in effect.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` up to the policy's attempt budget.
    ///
    /// Fatal errors (cancellation) and non-retryable errors return
    /// immediately. Between retryable failures the manager sleeps according
    /// to the backoff function, aborting the wait promptly on cancellation.
    /// When the budget runs out, the last error is wrapped with the attempt
    /// count.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation_label: &str,
        mut operation: F,
    ) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let class = classify_retry(&error);
                    if class.fatal {
                        tracing::debug!(
                            operation = operation_label,
                            attempt,
                            %error,
                            "fatal error; giving up"
                        );
                        return Err(error);
                    }
                    if !class.retryable {
                        tracing::debug!(
                            operation = operation_label,
                            attempt,
                            %error,
                            "non-retryable error; giving up"
                        );
                        return Err(error);
                    }

                    if attempt < max_attempts {
                        let delay = self.policy.delay(attempt);
                        tracing::debug!(
                            operation = operation_label,
                            attempt,
                            ?delay,
                            %error,
                            "retrying after transient failure"
                        );
                        tokio::select! {
                            () = cancel.cancelled() => return Err(EngineError::Cancelled),
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                    last_error = Some(error);
                }
            }
        }

        Err(EngineError::RetriesExhausted {
            operation: operation_label.to_string(),
            attempts: max_attempts,
            source: Box::new(last_error.unwrap_or(EngineError::Cancelled)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
            backoff: BackoffKind::Exponential,
        }
    }

    fn transient_error() -> EngineError {
        EngineError::io(
            "/f",
            io::Error::new(io::ErrorKind::TimedOut, "synthetic timeout"),
        )
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy {
            backoff: BackoffKind::Fixed,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(7), Duration::from_millis(100));
    }

    #[test]
    fn linear_backoff_scales_and_caps() {
        let policy = RetryPolicy {
            backoff: BackoffKind::Linear,
            initial_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay(1), Duration::from_secs(4));
        assert_eq!(policy.delay(2), Duration::from_secs(8));
        assert_eq!(policy.delay(3), Duration::from_secs(10));
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(10), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let manager = RetryManager::new(fast_policy());
        let result = manager
            .run(&CancellationToken::new(), "copy", move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(transient_error())
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn attempts_never_exceed_the_budget() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let manager = RetryManager::new(fast_policy());
        let error = manager
            .run(&CancellationToken::new(), "copy", move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(transient_error())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        match error {
            EngineError::RetriesExhausted {
                attempts: counted, ..
            } => assert_eq!(counted, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn non_retryable_errors_stop_after_one_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let manager = RetryManager::new(fast_policy());
        let error = manager
            .run(&CancellationToken::new(), "copy", move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(EngineError::io(
                        "/f",
                        io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
                    ))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(error, EngineError::Io { .. }));
    }

    #[tokio::test]
    async fn fatal_errors_stop_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let manager = RetryManager::new(fast_policy());
        let error = manager
            .run(&CancellationToken::new(), "copy", move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(EngineError::Cancelled)
                }
            })
            .await
            .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(error, EngineError::Cancelled));
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_backoff_wait() {
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_secs(30),
            ..RetryPolicy::default()
        };
        let manager = RetryManager::new(policy);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let error = manager
            .run(&cancel, "copy", || async { Err::<(), _>(transient_error()) })
            .await
            .unwrap_err();

        assert!(matches!(error, EngineError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
