//! Wall-clock budgets and cancellation guards
//!
//! A [`Deadline`] is fixed when a call starts and shared by every operation
//! the call performs, so probe fetches, requests and polling sleeps all draw
//! from the same budget.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SdkError};

/// Absolute point in time after which a call fails with a timeout
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    started: Instant,
    at: Option<Instant>,
}

impl Deadline {
    /// Deadline `timeout` from now, or none
    #[must_use]
    pub fn after(timeout: Option<Duration>) -> Self {
        let started = Instant::now();
        Self {
            started,
            at: timeout.map(|t| started + t),
        }
    }

    /// A deadline that never expires
    #[must_use]
    pub fn none() -> Self {
        Self::after(None)
    }

    /// The absolute instant, if bounded
    #[must_use]
    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    /// Time left, `None` when unbounded
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Whether the budget has run out
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Time since the deadline was created
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Run `fut` unless `cancel` fires or `deadline` passes first.
///
/// Cancellation wins ties, and a token that is already cancelled means `fut`
/// is never polled.
pub async fn guarded<F, T>(
    fut: F,
    cancel: Option<&CancellationToken>,
    deadline: Deadline,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let cancelled = async {
        match cancel {
            Some(token) => token.cancelled().await,
            None => futures::future::pending::<()>().await,
        }
    };
    let bounded = async {
        match deadline.instant() {
            Some(at) => tokio::time::timeout_at(at, fut)
                .await
                .map_err(|_| SdkError::Timeout)?,
            None => fut.await,
        }
    };

    tokio::select! {
        biased;
        () = cancelled => Err(SdkError::Cancelled),
        result = bounded => result,
    }
}

/// Sleep for `duration`, honouring cancellation and the deadline
pub async fn pause(
    duration: Duration,
    cancel: Option<&CancellationToken>,
    deadline: Deadline,
) -> Result<()> {
    guarded(
        async {
            tokio::time::sleep(duration).await;
            Ok(())
        },
        cancel,
        deadline,
    )
    .await
}
