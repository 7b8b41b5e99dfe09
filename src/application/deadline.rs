//! Caller deadlines propagated into store calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, timeout_at};

use crate::application::repos::RepoError;

/// Point in time after which a caller no longer wants an answer.
///
/// A store call that overruns the deadline is dropped, which rolls back any
/// transaction it had open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// No deadline; calls run to completion.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn after(duration: Duration) -> Self {
        Self {
            at: Some(Instant::now() + duration),
        }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left before expiry. `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Runs `fut` under the deadline. An expired deadline fails fast with
    /// [`RepoError::Timeout`] without polling `fut`.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, RepoError>
    where
        F: Future<Output = Result<T, RepoError>>,
    {
        match self.at {
            None => fut.await,
            Some(at) => {
                if Instant::now() >= at {
                    return Err(RepoError::Timeout);
                }
                timeout_at(at, fut)
                    .await
                    .unwrap_or(Err(RepoError::Timeout))
            }
        }
    }
}
