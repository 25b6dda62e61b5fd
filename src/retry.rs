//! A single generic retry primitive used everywhere an operation needs a bounded
//! number of attempts at a fixed backoff: status/secret upserts, stack deletes,
//! tag updates.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Calls `f` up to `attempts` times, sleeping `delay` between failures.
/// Returns the last error if every attempt fails.
pub async fn retry<F, Fut, T, E>(attempts: usize, delay: Duration, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_err = None;

    for attempt in 1..=attempts.max(1) {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(attempt, attempts, "retryable operation failed: {}", err);
                last_err = Some(err);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(last_err.expect("attempts >= 1 guarantees at least one iteration"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn succeeds_on_later_attempt() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), &str> = retry(3, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("not yet")
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_bound() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), &str> = retry(2, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err("always fails") }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
