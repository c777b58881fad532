use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::ChainError;

/// Bounded-retry policy applied to every remote call.
/// A first-class value rather than an annotation so tests can shrink it.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }
}

/// Run `op` under `policy`. Transient failures are retried with exponential
/// backoff and each failure is logged; validation-class errors return
/// immediately. An exhausted budget surfaces as `RemoteUnavailable`.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, ChainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    let mut delay = policy.base_delay;

    for attempt in 1..=policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                warn!(
                    "{} attempt {}/{} failed: {}",
                    operation, attempt, policy.max_attempts, err
                );
                if attempt < policy.max_attempts {
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }

    Err(ChainError::RemoteUnavailable {
        operation: operation.to_string(),
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);

        let result = with_retry(fast_policy(), "test_op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ChainError::Transport("connection reset".to_string()))
                } else {
                    Ok(42u64)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_validation_errors_are_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(fast_policy(), "test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ChainError::InvalidAddress("bogus".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(ChainError::InvalidAddress(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_budget_surfaces_remote_unavailable() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(fast_policy(), "test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ChainError::Transport("timeout".to_string())) }
        })
        .await;

        assert!(matches!(
            result,
            Err(ChainError::RemoteUnavailable { attempts: 5, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }
}
