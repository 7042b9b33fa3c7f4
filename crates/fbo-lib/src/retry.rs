//! Bounded exponential backoff for async operations.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::error::AppError;

/// Failure returned by [`retry_with_backoff`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The last attempt failed with this error.
    #[error(transparent)]
    Operation(E),

    /// A negative retry budget meant the operation was never invoked.
    #[error("no attempts made: max_retries was {max_retries}")]
    NoAttempts { max_retries: i32 },
}

impl<E> RetryError<E> {
    /// The operation's error, if an attempt was made.
    pub fn into_operation(self) -> Option<E> {
        match self {
            RetryError::Operation(err) => Some(err),
            RetryError::NoAttempts { .. } => None,
        }
    }
}

impl From<RetryError<AppError>> for AppError {
    fn from(err: RetryError<AppError>) -> Self {
        match err {
            RetryError::Operation(err) => err,
            RetryError::NoAttempts { max_retries } => {
                AppError::new(format!("no attempts made: max_retries was {max_retries}"))
                    .with_detail("maxRetries", max_retries)
            }
        }
    }
}

/// Retry policy defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: i32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl RetryConfig {
    /// Run `operation` under this policy.
    pub async fn run<T, E, F, Fut>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        retry_with_backoff(operation, self.max_retries, self.base_delay, self.max_delay).await
    }
}

/// Delay before the retry following `attempt`: `min(base * 2^attempt, max)`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

/// Call `operation` until it succeeds or `max_retries + 1` attempts have failed.
///
/// Attempts are sequential; between attempts the task sleeps for
/// [`backoff_delay`]. The error of the final attempt is returned unchanged.
/// A negative `max_retries` yields [`RetryError::NoAttempts`] without calling
/// the operation.
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut operation: F,
    max_retries: i32,
    base_delay: Duration,
    max_delay: Duration,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if max_retries < 0 {
        return Err(RetryError::NoAttempts { max_retries });
    }
    let max_retries = max_retries as u32;

    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt == max_retries => return Err(RetryError::Operation(err)),
            Err(_) => {
                let delay = backoff_delay(attempt, base_delay, max_delay);
                debug!(
                    attempt = attempt + 1,
                    max_attempts = max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    const BASE: Duration = Duration::from_millis(1000);
    const MAX: Duration = Duration::from_millis(10_000);

    #[test]
    fn test_backoff_delay_doubles_until_capped() {
        let delays: Vec<u64> = (0..6)
            .map(|a| backoff_delay(a, BASE, MAX).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000, 10_000]);
    }

    #[test]
    fn test_backoff_delay_saturates() {
        assert_eq!(backoff_delay(64, BASE, MAX), MAX);
        assert_eq!(backoff_delay(40, Duration::from_secs(u64::MAX / 2), MAX), MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt_makes_one_call() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryError<&str>> = retry_with_backoff(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            },
            3,
            BASE,
            MAX,
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_first_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(format!("fail {n}"))
                } else {
                    Ok("done")
                }
            },
            5,
            BASE,
            MAX,
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_makes_max_retries_plus_one_attempts() {
        for max_retries in 0..=4 {
            let calls = AtomicU32::new(0);
            let result: Result<(), _> = retry_with_backoff(
                || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Err(format!("failure {n}"))
                },
                max_retries,
                BASE,
                MAX,
            )
            .await;

            let attempts = max_retries as u32 + 1;
            assert_eq!(calls.load(Ordering::SeqCst), attempts);
            match result {
                Err(RetryError::Operation(msg)) => {
                    assert_eq!(msg, format!("failure {}", attempts - 1))
                }
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_between_attempts() {
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        let _: Result<(), _> = retry_with_backoff(
            || {
                let stamps = Arc::clone(&stamps);
                async move {
                    stamps.lock().unwrap().push(start.elapsed());
                    Err::<(), _>("nope")
                }
            },
            4,
            BASE,
            Duration::from_millis(5000),
        )
        .await;

        let stamps = stamps.lock().unwrap().clone();
        let gaps: Vec<u64> = stamps
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis() as u64)
            .collect();
        assert_eq!(gaps, vec![1000, 2000, 4000, 5000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_makes_single_attempt_without_delay() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), _> = retry_with_backoff(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("only once")
            },
            0,
            BASE,
            MAX,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(matches!(result, Err(RetryError::Operation("only once"))));
    }

    #[tokio::test]
    async fn test_negative_retries_never_calls_operation() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RetryError<&str>> = retry_with_backoff(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            -1,
            BASE,
            MAX,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(
            result,
            Err(RetryError::NoAttempts { max_retries: -1 })
        ));
    }

    #[test]
    fn test_no_attempts_converts_to_app_error() {
        let err: AppError = RetryError::<AppError>::NoAttempts { max_retries: -2 }.into();
        assert_eq!(err.error_code(), crate::error::LAMBDA_ERROR);
        assert!(err.to_string().contains("no attempts made"));
    }

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay, BASE);
        assert_eq!(config.max_delay, MAX);
    }
}
