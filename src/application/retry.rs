//! Bounded retries for transient store failures.

use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use metrics::counter;
use tokio::time::sleep;
use tracing::warn;

use crate::application::{deadline::Deadline, repos::RepoError};
use crate::config::StoreSettings;

const SOURCE: &str = "application::retry";
const METRIC_STORE_RETRY: &str = "coursebook_store_retry_total";

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: NonZeroU32,
    /// Base pause; attempt `n` waits `n * backoff`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: NonZeroU32::new(DEFAULT_MAX_ATTEMPTS).unwrap_or(NonZeroU32::MIN),
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl From<&StoreSettings> for RetryPolicy {
    fn from(settings: &StoreSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            backoff: settings.retry_backoff,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn once() -> Self {
        Self {
            max_attempts: NonZeroU32::MIN,
            backoff: Duration::ZERO,
        }
    }

    fn pause(&self, attempt: u32, deadline: &Deadline) -> Duration {
        let pause = self.backoff.saturating_mul(attempt);
        match deadline.remaining() {
            Some(left) => pause.min(left),
            None => pause,
        }
    }
}

/// Runs `call` until it succeeds, fails with a non-retryable error, runs out
/// of attempts, or the deadline passes. Every attempt runs under `deadline`.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    deadline: Deadline,
    op: &'static str,
    mut call: F,
) -> Result<T, RepoError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RepoError>>,
{
    let max_attempts = policy.max_attempts.get();
    let mut attempt = 1;
    loop {
        match deadline.run(call()).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts && !deadline.is_expired() => {
                warn!(
                    target = SOURCE,
                    op,
                    attempt,
                    max_attempts,
                    error = %err,
                    "transient store failure, retrying"
                );
                counter!(METRIC_STORE_RETRY, "op" => op).increment(1);
                sleep(policy.pause(attempt, &deadline)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: NonZeroU32::new(max_attempts).expect("non-zero attempts"),
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy(3), Deadline::none(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RepoError::retryable("serialization failure"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&policy(2), Deadline::none(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RepoError::retryable("deadlock detected")) }
        })
        .await;

        assert!(matches!(result, Err(RepoError::Retryable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&policy(5), Deadline::none(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(RepoError::Duplicate {
                    constraint: "courses_code_id_key".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(RepoError::Duplicate { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_deadline_stops_retries() {
        let calls = AtomicU32::new(0);
        let deadline = Deadline::at(tokio::time::Instant::now());
        let result: Result<(), _> = with_retry(&policy(5), deadline, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(matches!(result, Err(RepoError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
