//! Bounded retry for transient adapter failures.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::warn;

use crate::common::error::{AdapterError, AdapterResult};

/// Retry policy for remote calls made on behalf of one event.
///
/// Retries happen inside the event's own task, so a retrying call only
/// delays events of the same sender.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first one (0 = no retry).
    pub max_retries: usize,
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, failures are returned as-is.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
            .with_jitter()
    }

    /// Run `call`, retrying transient failures with exponential backoff.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, call: F) -> AdapterResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AdapterResult<T>>,
    {
        call.retry(self.backoff())
            .when(AdapterError::is_transient)
            .notify(|err: &AdapterError, delay: Duration| {
                warn!(
                    "{} failed ({}), retrying in {:.1}s",
                    operation,
                    err,
                    delay.as_secs_f64()
                );
            })
            .await
    }
}

impl AdapterError {
    /// Whether a later attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AdapterError::Request(_) => true,
            AdapterError::Status { status, .. } => *status == 429 || *status >= 500,
            AdapterError::InvalidResponse { .. } | AdapterError::Other(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn unavailable() -> AdapterError {
        AdapterError::Status {
            operation: "join",
            status: 503,
            message: "busy".to_string(),
        }
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let calls = AtomicUsize::new(0);
        let result = fast(2)
            .run("join", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(unavailable())
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let calls = AtomicUsize::new(0);
        let result: AdapterResult<()> = fast(2)
            .run("join", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: AdapterResult<()> = fast(5)
            .run("register", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AdapterError::Status {
                    operation: "register",
                    status: 403,
                    message: "forbidden".to_string(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_none_policy_makes_single_attempt() {
        let calls = AtomicUsize::new(0);
        let result: AdapterResult<()> = RetryPolicy::none()
            .run("leave", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
