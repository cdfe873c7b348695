//! Bounded retry with exponential backoff for read-only venue calls.
//!
//! Mutating calls (place/cancel) must not go through this helper: a failed
//! place is reported, not retried, to avoid double-execution.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::VenueError;

/// Maximum attempts for a read-only venue call.
pub const MAX_ATTEMPTS: u32 = 3;

/// Initial backoff before the first retry.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Runs `op`, retrying retryable [`VenueError`]s up to [`MAX_ATTEMPTS`] times
/// with exponential backoff (100 ms, 200 ms, ...).
///
/// `operation` names the call for log context.
pub async fn with_retry<T, F, Fut>(operation: &str, mut op: F) -> Result<T, VenueError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VenueError>>,
{
    let mut backoff = INITIAL_BACKOFF;

    for attempt in 1..=MAX_ATTEMPTS {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                warn!(
                    operation,
                    attempt,
                    max_attempts = MAX_ATTEMPTS,
                    error = %err,
                    "venue call failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(err) => {
                warn!(
                    operation,
                    attempt,
                    error = %err,
                    "venue call failed, retries exhausted"
                );
                return Err(err);
            }
        }
    }

    unreachable!("retry loop always returns")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let result = with_retry("price", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, VenueError>(42.0) }
        })
        .await;
        assert_eq!(result.unwrap(), 42.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry("price", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(VenueError::Transient("timeout".into()))
                } else {
                    Ok(7.0)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7.0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<f64, _> = with_retry("price", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(VenueError::Transient("timeout".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_non_retryable() {
        let calls = AtomicU32::new(0);
        let result: Result<f64, _> = with_retry("price", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(VenueError::NotConnected("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
