//! Capacity Probe
//!
//! Fetches the server's current allowance from a limits endpoint. Two payload
//! shapes are understood:
//!
//! ```text
//! { "token_capacity": 10, "tokens_used": 3 }
//! { "result": { "concurrency": { "limit": 10, "remaining": 7 } } }
//! ```
//!
//! Both normalize to [`CapacityAllowance`]. Concurrent callers share a single
//! in-flight fetch, and a fetched allowance is reused for a short TTL so that
//! polling loops do not hammer the endpoint.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::time::Instant;

use crate::config::MAX_ALLOWANCE_TTL;
use crate::error::{Result, SdkError};
use crate::transport::{RequestFacade, RequestOptions};

/// Server-declared budget at a point in time
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CapacityAllowance {
    /// Total capacity
    pub token_capacity: u64,
    /// Capacity currently in use
    pub tokens_used: u64,
}

impl CapacityAllowance {
    /// Create an allowance
    #[must_use]
    pub fn new(token_capacity: u64, tokens_used: u64) -> Self {
        Self {
            token_capacity,
            tokens_used,
        }
    }

    /// Whether `cost` more units fit into the allowance
    #[must_use]
    pub fn admits(&self, cost: u64) -> bool {
        self.tokens_used.saturating_add(cost) <= self.token_capacity
    }

    /// Unused capacity
    #[must_use]
    pub fn available(&self) -> u64 {
        self.token_capacity.saturating_sub(self.tokens_used)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LimitsPayload {
    Tokens {
        token_capacity: u64,
        tokens_used: u64,
    },
    Concurrency {
        result: ConcurrencyResult,
    },
}

#[derive(Debug, Deserialize)]
struct ConcurrencyResult {
    concurrency: ConcurrencyLimits,
}

#[derive(Debug, Deserialize)]
struct ConcurrencyLimits {
    limit: u64,
    #[serde(default)]
    remaining: Option<u64>,
}

impl CapacityAllowance {
    /// Parse a limits endpoint response
    pub fn from_payload(payload: serde_json::Value) -> Result<Self> {
        let parsed: LimitsPayload = serde_json::from_value(payload)
            .map_err(|e| SdkError::internal_with("unrecognized limits payload", e))?;

        Ok(match parsed {
            LimitsPayload::Tokens {
                token_capacity,
                tokens_used,
            } => Self::new(token_capacity, tokens_used),
            LimitsPayload::Concurrency { result } => {
                let limits = result.concurrency;
                let remaining = limits.remaining.unwrap_or(limits.limit);
                Self::new(limits.limit, limits.limit.saturating_sub(remaining))
            }
        })
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<CapacityAllowance>>>;

#[derive(Default)]
struct ProbeCache {
    /// Last fetched allowance and when it was fetched
    last: Option<(Instant, CapacityAllowance)>,
    /// Fetch currently in flight
    in_flight: Option<SharedFetch>,
}

/// Lazily fetches and briefly caches the server allowance for one limits endpoint
pub struct CapacityProbe {
    facade: Arc<dyn RequestFacade>,
    path: String,
    ttl: Duration,
    cache: Mutex<ProbeCache>,
}

impl std::fmt::Debug for CapacityProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapacityProbe")
            .field("path", &self.path)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl CapacityProbe {
    /// Create a probe for `path`, reusing results for at most `ttl` (capped at one second)
    pub fn new(facade: Arc<dyn RequestFacade>, path: impl Into<String>, ttl: Duration) -> Self {
        Self {
            facade,
            path: path.into(),
            ttl: ttl.min(MAX_ALLOWANCE_TTL),
            cache: Mutex::new(ProbeCache::default()),
        }
    }

    /// Limits endpoint this probe reads
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current allowance, served from cache when fresh.
    ///
    /// Callers arriving while a fetch is running await that same fetch.
    /// Fetch failures are returned unchanged and are not cached.
    pub async fn allowance(&self) -> Result<CapacityAllowance> {
        let fetch = {
            let mut cache = self.cache.lock();
            if let Some((at, allowance)) = cache.last {
                if at.elapsed() < self.ttl {
                    return Ok(allowance);
                }
            }
            if let Some(fetch) = cache.in_flight.clone() {
                fetch
            } else {
                let fetch = self.start_fetch();
                cache.in_flight = Some(fetch.clone());
                fetch
            }
        };

        let result = fetch.clone().await;

        let mut cache = self.cache.lock();
        if cache
            .in_flight
            .as_ref()
            .is_some_and(|current| current.ptr_eq(&fetch))
        {
            cache.in_flight = None;
            if let Ok(allowance) = result {
                cache.last = Some((Instant::now(), allowance));
            }
        }
        result
    }

    /// Concurrency allowance used to size a worker pool (never below one).
    ///
    /// Shares the cache and any in-flight fetch with [`Self::allowance`].
    pub async fn concurrency_limit(&self) -> Result<usize> {
        let allowance = self.allowance().await?;
        let limit = usize::try_from(allowance.token_capacity).unwrap_or(usize::MAX);
        Ok(limit.max(1))
    }

    /// Drop any cached allowance
    pub fn invalidate(&self) {
        self.cache.lock().last = None;
    }

    fn start_fetch(&self) -> SharedFetch {
        tracing::debug!(path = %self.path, "Fetching capacity allowance");
        fetch_allowance(Arc::clone(&self.facade), self.path.clone())
            .boxed()
            .shared()
    }
}

async fn fetch_allowance(
    facade: Arc<dyn RequestFacade>,
    path: String,
) -> Result<CapacityAllowance> {
    let payload = facade.get(&path, RequestOptions::default()).await?;
    CapacityAllowance::from_payload(payload)
}
