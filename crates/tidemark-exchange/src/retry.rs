//! Bounded retry with exponential backoff for adapter calls.

use crate::error::{ExchangeError, ExchangeResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Default backoff schedule: 200 ms, 800 ms, 2 s.
pub const DEFAULT_BACKOFF: [Duration; 3] = [
    Duration::from_millis(200),
    Duration::from_millis(800),
    Duration::from_millis(2000),
];

/// Run `call` and retry retryable failures according to `backoff`.
///
/// Non-retryable errors (rejections, unknown instruments) are returned
/// immediately. After the schedule is exhausted the last error is returned;
/// the caller decides whether to enter reconciliation.
pub async fn with_retry<T, F, Fut>(
    op: &str,
    backoff: &[Duration],
    mut call: F,
) -> ExchangeResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ExchangeResult<T>>,
{
    let mut attempt = 0usize;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < backoff.len() => {
                let delay = backoff[attempt];
                attempt += 1;
                warn!(
                    op,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying adapter call"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Convenience: is this terminal error a timeout after retries?
pub fn is_timeout(err: &ExchangeError) -> bool {
    matches!(err, ExchangeError::Timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let attempts = AtomicUsize::new(0);
        let schedule = [Duration::from_millis(1), Duration::from_millis(1)];

        let result = with_retry("test", &schedule, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ExchangeError::Transport("flaky".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let attempts = AtomicUsize::new(0);

        let result: ExchangeResult<()> = with_retry("test", &DEFAULT_BACKOFF, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ExchangeError::Rejected("insufficient margin".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(ExchangeError::Rejected(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_schedule_returns_last_error() {
        let schedule = [Duration::from_millis(1)];
        let result: ExchangeResult<()> = with_retry("test", &schedule, || async {
            Err(ExchangeError::Timeout)
        })
        .await;

        assert!(matches!(result, Err(ExchangeError::Timeout)));
    }
}
