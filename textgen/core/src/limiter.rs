//! Concurrency Limiter
//!
//! A bounded worker pool whose size is discovered from the server. The pool
//! moves through three phases:
//!
//! ```text
//! Uninitialized ──first execute()──▶ Initializing ──probe ok──▶ Ready
//!       ▲                                 │
//!       └────────────probe failed─────────┘
//! ```
//!
//! Callers arriving while the pool is `Initializing` await the same in-flight
//! probe. `Ready` is terminal: the pool is never resized, even if the server's
//! allowance changes later.
//!
//! Tasks rejected with the server's concurrency-limit error give up their slot,
//! back off briefly and queue again. Every other outcome is returned to the
//! caller unchanged.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::budget::{self, Deadline};
use crate::capacity::CapacityProbe;
use crate::error::{Result, SdkError};

/// First delay before re-queueing a concurrency-limited task
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(25);

/// Cap on the re-queue delay
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Delay before re-queueing after the `attempt`-th rejection (1-based)
fn retry_backoff(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    RETRY_BACKOFF_BASE
        .saturating_mul(1 << shift)
        .min(RETRY_BACKOFF_MAX)
}

/// Options for a single [`ConcurrencyLimiter::execute`] call
#[derive(Clone, Debug, Default)]
pub struct ExecuteOptions {
    /// Cooperative cancellation
    pub cancel: Option<CancellationToken>,
    /// Budget covering queue time plus run time
    pub timeout: Option<Duration>,
}

impl ExecuteOptions {
    /// Set the cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Externally visible phase of a limiter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimiterPhase {
    /// No probe issued yet
    Uninitialized,
    /// Probe in flight
    Initializing,
    /// Pool sized and accepting work
    Ready,
}

type SharedInit = Shared<BoxFuture<'static, Result<(Arc<Semaphore>, usize)>>>;

enum LimiterState {
    Uninitialized,
    Initializing(SharedInit),
    Ready {
        pool: Arc<Semaphore>,
        concurrency: usize,
    },
}

/// Snapshot of limiter counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LimiterStats {
    /// Calls waiting for a slot or running
    pub pending: usize,
    /// Tasks currently holding a slot
    pub running: usize,
    /// Calls that finished successfully
    pub completed: u64,
    /// Calls that finished with an error
    pub failed: u64,
    /// Task attempts re-queued after a concurrency-limit rejection
    pub retried: u64,
}

#[derive(Default)]
struct LimiterStatsAtomic {
    pending: AtomicUsize,
    running: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

impl LimiterStatsAtomic {
    fn snapshot(&self) -> LimiterStats {
        LimiterStats {
            pending: self.pending.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }
}

/// Decrements a gauge on drop
struct GaugeGuard<'a>(&'a AtomicUsize);

impl<'a> GaugeGuard<'a> {
    fn enter(gauge: &'a AtomicUsize) -> Self {
        gauge.fetch_add(1, Ordering::Relaxed);
        Self(gauge)
    }
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Bounded pool sized by the server's concurrency allowance
pub struct ConcurrencyLimiter {
    /// Service class this limiter guards (for logs)
    name: String,
    probe: Arc<CapacityProbe>,
    state: Mutex<LimiterState>,
    stats: LimiterStatsAtomic,
}

impl std::fmt::Debug for ConcurrencyLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyLimiter")
            .field("name", &self.name)
            .field("phase", &self.phase())
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConcurrencyLimiter {
    /// Create an uninitialized limiter
    pub fn new(name: impl Into<String>, probe: Arc<CapacityProbe>) -> Self {
        Self {
            name: name.into(),
            probe,
            state: Mutex::new(LimiterState::Uninitialized),
            stats: LimiterStatsAtomic::default(),
        }
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> LimiterPhase {
        match *self.state.lock() {
            LimiterState::Uninitialized => LimiterPhase::Uninitialized,
            LimiterState::Initializing(_) => LimiterPhase::Initializing,
            LimiterState::Ready { .. } => LimiterPhase::Ready,
        }
    }

    /// Pool size, once ready
    #[must_use]
    pub fn concurrency(&self) -> Option<usize> {
        match *self.state.lock() {
            LimiterState::Ready { concurrency, .. } => Some(concurrency),
            _ => None,
        }
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> LimiterStats {
        self.stats.snapshot()
    }

    /// Run `task` inside the pool.
    ///
    /// `task` is invoked again for every concurrency-limit rejection, so it
    /// must be able to produce a fresh attempt each time. The timeout covers
    /// initialization, queueing and every attempt.
    pub async fn execute<F, Fut, T>(&self, task: F, options: ExecuteOptions) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _pending = GaugeGuard::enter(&self.stats.pending);
        let deadline = Deadline::after(options.timeout);

        let result = budget::guarded(self.run(task), options.cancel.as_ref(), deadline).await;

        match result {
            Ok(_) => self.stats.completed.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.stats.failed.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    async fn run<F, Fut, T>(&self, mut task: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let pool = self.ready().await?;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let permit = pool
                .acquire()
                .await
                .map_err(|_| SdkError::internal("limiter pool closed"))?;
            let running = GaugeGuard::enter(&self.stats.running);

            match task().await {
                Err(err) if err.is_concurrency_limit() => {
                    drop(running);
                    drop(permit);
                    self.stats.retried.fetch_add(1, Ordering::Relaxed);
                    let backoff = retry_backoff(attempt);
                    tracing::debug!(
                        limiter = %self.name,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Concurrency limit hit upstream, re-queueing task after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
    }

    /// Pool handle, initializing it on first use
    async fn ready(&self) -> Result<Arc<Semaphore>> {
        let init = {
            let mut state = self.state.lock();
            match &*state {
                LimiterState::Ready { pool, .. } => return Ok(Arc::clone(pool)),
                LimiterState::Initializing(init) => init.clone(),
                LimiterState::Uninitialized => {
                    tracing::debug!(limiter = %self.name, "Probing concurrency allowance");
                    let init = Self::initialize(Arc::clone(&self.probe));
                    *state = LimiterState::Initializing(init.clone());
                    init
                }
            }
        };

        let result = init.clone().await;

        let mut state = self.state.lock();
        let settles = matches!(&*state, LimiterState::Initializing(current) if current.ptr_eq(&init));
        if settles {
            *state = match &result {
                Ok((pool, concurrency)) => {
                    tracing::info!(limiter = %self.name, concurrency, "Limiter ready");
                    LimiterState::Ready {
                        pool: Arc::clone(pool),
                        concurrency: *concurrency,
                    }
                }
                Err(err) => {
                    tracing::warn!(limiter = %self.name, error = %err, "Limiter initialization failed");
                    LimiterState::Uninitialized
                }
            };
        }
        result.map(|(pool, _)| pool)
    }

    fn initialize(probe: Arc<CapacityProbe>) -> SharedInit {
        async move {
            let limit = probe.concurrency_limit().await?.min(Semaphore::MAX_PERMITS);
            Ok::<_, SdkError>((Arc::new(Semaphore::new(limit)), limit))
        }
        .boxed()
        .shared()
    }
}
