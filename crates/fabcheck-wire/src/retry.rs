//! Bounded retry at a fixed interval.
//!
//! The initiator uses this to wait for the target's listener. The delay
//! between attempts never grows.

use std::time::Duration;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first try).
    pub max_attempts: u32,
    /// Delay between consecutive attempts.
    pub interval: Duration,
}

impl RetryConfig {
    /// Every retry waits exactly `interval`.
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

/// Result of a retry operation.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded.
    Success {
        /// The successful result.
        result: T,
        /// Total number of attempts made (1 = first try succeeded).
        attempts: u32,
    },
    /// The operation failed with an error the predicate refused to retry.
    Fatal {
        /// The non-retryable error.
        error: E,
        /// Total number of attempts made.
        attempts: u32,
    },
    /// All retries exhausted without success.
    Exhausted {
        /// The error from the last attempt.
        last_error: E,
        /// Total number of attempts made.
        attempts: u32,
    },
}

// ---------------------------------------------------------------------------
// Core retry function
// ---------------------------------------------------------------------------

/// Execute an async operation with retry.
///
/// `operation` is called once per attempt and receives the 1-based attempt
/// number. `should_retry` decides whether an error is transient; a `false`
/// ends the loop immediately with [`RetryOutcome::Fatal`].
pub async fn retry_async<F, Fut, T, E, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Debug,
{
    let max = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(attempt, "retry succeeded after {} failures", attempt - 1);
                }
                return RetryOutcome::Success {
                    result,
                    attempts: attempt,
                };
            }
            Err(err) => err,
        };

        if !should_retry(&err) {
            debug!(attempt, "error is not retryable, giving up: {:?}", err);
            return RetryOutcome::Fatal {
                error: err,
                attempts: attempt,
            };
        }
        if attempt >= max {
            warn!(
                attempt,
                max_attempts = max,
                "all retry attempts exhausted: {:?}",
                err
            );
            return RetryOutcome::Exhausted {
                last_error: err,
                attempts: attempt,
            };
        }

        debug!(
            attempt,
            delay_ms = config.interval.as_millis() as u64,
            "retrying after error: {:?}",
            err
        );
        tokio::time::sleep(config.interval).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retry_success_first_try() {
        let config = RetryConfig::fixed(3, Duration::from_millis(10));
        let outcome = retry_async(&config, |_| async { Ok::<&str, &str>("hello") }, |_| true).await;

        match outcome {
            RetryOutcome::Success { result, attempts } => {
                assert_eq!(result, "hello");
                assert_eq!(attempts, 1);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_retry_success_on_kth_attempt() {
        let config = RetryConfig::fixed(30, Duration::from_millis(1));
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let outcome = retry_async(
            &config,
            move |attempt| {
                let c = counter_clone.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    if attempt < 7 {
                        Err("not yet")
                    } else {
                        Ok(attempt)
                    }
                }
            },
            |_| true,
        )
        .await;

        match outcome {
            RetryOutcome::Success { result, attempts } => {
                assert_eq!(result, 7);
                assert_eq!(attempts, 7);
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let config = RetryConfig::fixed(3, Duration::from_millis(1));
        let outcome =
            retry_async(&config, |_| async { Err::<(), &str>("always fails") }, |_| true).await;

        match outcome {
            RetryOutcome::Exhausted {
                last_error,
                attempts,
            } => {
                assert_eq!(last_error, "always fails");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_retry_non_retryable_error() {
        let config = RetryConfig::fixed(5, Duration::from_millis(1));
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let outcome = retry_async(
            &config,
            move |_| {
                let c = counter_clone.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), &str>("fatal error")
                }
            },
            |_| false,
        )
        .await;

        assert!(matches!(
            outcome,
            RetryOutcome::Fatal {
                error: "fatal error",
                attempts: 1
            }
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_spacing_between_attempts() {
        let config = RetryConfig::fixed(4, Duration::from_secs(1));
        let start = tokio::time::Instant::now();
        let stamps = Arc::new(std::sync::Mutex::new(Vec::new()));
        let stamps_clone = stamps.clone();

        let outcome = retry_async(
            &config,
            move |_| {
                let s = stamps_clone.clone();
                async move {
                    s.lock().unwrap().push(start.elapsed());
                    Err::<(), &str>("refused")
                }
            },
            |_| true,
        )
        .await;

        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 4, .. }));
        let stamps = stamps.lock().unwrap();
        let secs: Vec<u64> = stamps.iter().map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![0, 1, 2, 3]);
    }
}
