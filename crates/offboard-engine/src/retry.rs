//! Bounded retry with exponential backoff for source calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use offboard_config::RetryPolicy;
use offboard_core::{Sleeper, SourceResult};
use rand::Rng;
use tracing::debug;

/// Result of a retried call together with the number of calls made.
#[derive(Debug)]
pub struct Attempted<T> {
    /// Final result (the last error when every attempt failed).
    pub result: SourceResult<T>,
    /// Calls made, at least one.
    pub attempts: u32,
}

/// Applies a [`RetryPolicy`] using an injected [`Sleeper`].
#[derive(Debug, Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl Retrier {
    /// Retrier for `policy`.
    #[must_use]
    pub fn new(policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    /// Call `operation` until it succeeds, fails permanently, or the attempt
    /// budget runs out. `on_retry` sees the failed attempt number and the
    /// delay before the next one.
    pub async fn run<T, F, Fut, R>(&self, mut operation: F, mut on_retry: R) -> Attempted<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = SourceResult<T>> + Send,
        R: FnMut(u32, Duration) + Send,
        T: Send,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt, err.retry_after());
                    debug!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = err.kind(),
                        operation = err.operation(),
                        "retrying transient source failure"
                    );
                    on_retry(attempt, delay);
                    self.sleeper.sleep(delay).await;
                }
                Err(err) => {
                    return Attempted {
                        result: Err(err),
                        attempts: attempt,
                    };
                }
            }
        }
    }

    fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.policy.delay_for(attempt, retry_after);
        if self.policy.jitter && retry_after.is_none() {
            jittered(delay)
        } else {
            delay
        }
    }
}

/// Uniform delay in `[delay / 2, delay]`.
fn jittered(delay: Duration) -> Duration {
    let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    let half = millis / 2;
    if half == 0 {
        return delay;
    }
    let extra = rand::rng().random_range(0..=millis - half);
    Duration::from_millis(half + extra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use offboard_core::SourceError;
    use offboard_test_support::RecordingSleeper;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 1_000,
            jitter: false,
        }
    }

    fn limited() -> SourceError {
        SourceError::RateLimited {
            operation: "delete_permission",
            retry_after: None,
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_with_growing_delays() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let retrier = Retrier::new(policy(5), sleeper.clone());
        let calls = AtomicU32::new(0);
        let mut retries = Vec::new();

        let attempted = retrier
            .run(
                || {
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    async move { if call < 2 { Err(limited()) } else { Ok(call) } }
                },
                |attempt, delay| retries.push((attempt, delay)),
            )
            .await;

        assert_eq!(attempted.result, Ok(2));
        assert_eq!(attempted.attempts, 3);
        assert_eq!(
            sleeper.sleeps(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        assert_eq!(retries.len(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts_with_last_error() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let retrier = Retrier::new(policy(3), sleeper.clone());

        let attempted: Attempted<()> = retrier
            .run(
                || async {
                    Err(SourceError::Timeout {
                        operation: "delete_permission",
                    })
                },
                |_, _| {},
            )
            .await;

        assert_eq!(attempted.attempts, 3);
        assert!(matches!(attempted.result, Err(SourceError::Timeout { .. })));
        assert_eq!(sleeper.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let retrier = Retrier::new(policy(5), sleeper.clone());

        let attempted: Attempted<()> = retrier
            .run(
                || async {
                    Err(SourceError::PermissionDenied {
                        operation: "delete_permission",
                        reason: None,
                    })
                },
                |_, _| {},
            )
            .await;

        assert_eq!(attempted.attempts, 1);
        assert!(sleeper.sleeps().is_empty());
    }

    #[tokio::test]
    async fn server_retry_after_is_honoured() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let retrier = Retrier::new(
            RetryPolicy {
                jitter: true,
                ..policy(2)
            },
            sleeper.clone(),
        );
        let calls = AtomicU32::new(0);

        let attempted = retrier
            .run(
                || {
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if call == 0 {
                            Err(SourceError::RateLimited {
                                operation: "list_files",
                                retry_after: Some(Duration::from_secs(7)),
                            })
                        } else {
                            Ok(())
                        }
                    }
                },
                |_, _| {},
            )
            .await;

        assert!(attempted.result.is_ok());
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(7)]);
    }

    #[test]
    fn jitter_stays_within_upper_half() {
        for _ in 0..100 {
            let delay = jittered(Duration::from_millis(1_000));
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1_000));
        }
        assert_eq!(jittered(Duration::from_millis(1)), Duration::from_millis(1));
    }
}
