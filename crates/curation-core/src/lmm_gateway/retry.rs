//! Exponential backoff with jitter for transient LMM errors, built on the
//! `backoff` crate rather than a hand-rolled retry loop.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use tracing::warn;

use super::error::LmmError;

const MAX_ELAPSED: Duration = Duration::from_secs(60);
const INITIAL_INTERVAL: Duration = Duration::from_millis(500);

/// Runs `op` until it succeeds, a non-retryable [`LmmError`] is returned, or
/// the backoff budget is exhausted. `invalid_argument`/`permission_denied`
/// style errors are terminal and returned immediately.
pub async fn retry_with_backoff<T, F, Fut>(mut op: F) -> Result<T, LmmError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, LmmError>>,
{
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(INITIAL_INTERVAL)
        .with_max_elapsed_time(Some(MAX_ELAPSED))
        .build();

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => match backoff.next_backoff() {
                Some(delay) => {
                    warn!(error = %err, delay_ms = delay.as_millis(), "retrying after transient LMM error");
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff(|| async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(LmmError::Transient("throttled".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_terminal_errors() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(LmmError::InvalidArgument("bad schema".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
