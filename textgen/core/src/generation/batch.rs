//! Batch admission
//!
//! Each input of a batch runs as its own task. A task polls the capacity
//! probe until its cumulative reservation fits the allowance, sends the
//! request through the generation limiter, and then waits for its left
//! neighbour to settle before publishing its own outcome:
//!
//! ```text
//! input 0: run ─▶ release ───────────────▶ publish ─▶ settled(0)
//! input 1: run ─▶ release ─▶ wait settled(0) ─▶ publish ─▶ settled(1)
//! input 2: run ─▶ release ─▶ wait settled(1) ─▶ publish ─▶ settled(2)
//! ```
//!
//! Work overlaps freely; only publication is serialized.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::ledger::TokenBudgetLedger;
use super::service::{ServiceInner, GENERATION_PATH};
use super::types::{GenerationRequest, GenerationResponse, GenerationResult};
use crate::budget::{self, Deadline};
use crate::error::{Result, SdkError};
use crate::limiter::ExecuteOptions;
use crate::transport::RequestOptions;

/// Pending outcome of one batch input.
///
/// Resolves once this input and every input before it have settled.
#[derive(Debug)]
pub struct GenerationHandle {
    index: usize,
    rx: oneshot::Receiver<Result<GenerationResult>>,
}

impl GenerationHandle {
    /// Position of the input in the batch
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Future for GenerationHandle {
    type Output = Result<GenerationResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| Err(SdkError::internal("generation task ended without a result")))
        })
    }
}

/// One input's admission state
struct BatchJob {
    index: usize,
    request: GenerationRequest,
    ledger: Arc<TokenBudgetLedger>,
    deadline: Deadline,
    cancel: CancellationToken,
    inner: Arc<ServiceInner>,
}

/// Spawn one task per input and return their handles in input order
pub(super) fn spawn_batch(
    inner: &Arc<ServiceInner>,
    inputs: Vec<GenerationRequest>,
    cost_per_input: u64,
    cancel: &CancellationToken,
    deadline: Deadline,
) -> Vec<GenerationHandle> {
    let ledger = Arc::new(TokenBudgetLedger::reserve(inputs.len(), cost_per_input));
    let mut left_neighbour: Option<oneshot::Receiver<()>> = None;

    tracing::debug!(inputs = inputs.len(), "Scheduling generation batch");

    inputs
        .into_iter()
        .enumerate()
        .map(|(index, request)| {
            let (result_tx, result_rx) = oneshot::channel();
            let (settled_tx, settled_rx) = oneshot::channel::<()>();
            let previous = left_neighbour.replace(settled_rx);

            let job = BatchJob {
                index,
                request,
                ledger: Arc::clone(&ledger),
                deadline,
                cancel: cancel.child_token(),
                inner: Arc::clone(inner),
            };

            tokio::spawn(async move {
                let result = job.run().await;
                job.ledger.release(index);

                if let Some(previous) = previous {
                    // Outcome of the neighbour is irrelevant, only its settlement
                    let _ = previous.await;
                }

                match result {
                    Ok(_) => tracing::debug!(index, "Generation input settled"),
                    Err(ref err) => tracing::debug!(index, error = %err, "Generation input failed"),
                }
                let _ = result_tx.send(result);
                let _ = settled_tx.send(());
            });

            GenerationHandle {
                index,
                rx: result_rx,
            }
        })
        .collect()
}

impl BatchJob {
    /// Poll for budget, then send. Returns this input's terminal outcome.
    async fn run(&self) -> Result<GenerationResult> {
        let body = self.request.to_body()?;
        let poll_interval = self.inner.poll_interval;
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(SdkError::Cancelled);
            }
            if self.deadline.is_expired() {
                return Err(SdkError::Timeout);
            }

            let allowance =
                budget::guarded(self.inner.probe.allowance(), Some(&self.cancel), self.deadline)
                    .await?;
            let projected = self.ledger.cumulative_through(self.index);

            if !allowance.admits(projected) {
                // Budget backoff: wait for earlier inputs or other clients to free capacity
                let wait = self
                    .deadline
                    .remaining()
                    .map_or(poll_interval, |left| left.min(poll_interval));
                tracing::debug!(
                    index = self.index,
                    projected,
                    available = allowance.available(),
                    wait_ms = wait.as_millis() as u64,
                    "Capacity exhausted, backing off"
                );
                budget::pause(wait, Some(&self.cancel), self.deadline).await?;
                continue;
            }

            attempt += 1;
            tracing::debug!(index = self.index, attempt, projected, "Admitting generation input");

            match self.send(&body).await {
                Err(err) if err.is_too_many_requests() || err.is_concurrency_limit() => {
                    tracing::debug!(
                        index = self.index,
                        attempt,
                        error = %err,
                        "Throttled upstream, rechecking capacity"
                    );
                    self.inner.probe.invalidate();
                }
                outcome => return outcome,
            }
        }
    }

    async fn send(&self, body: &serde_json::Value) -> Result<GenerationResult> {
        let options = ExecuteOptions {
            cancel: Some(self.cancel.clone()),
            timeout: self.deadline.remaining(),
        };

        self.inner
            .limiter
            .execute(
                || {
                    let body = body.clone();
                    let options = RequestOptions {
                        timeout: self.deadline.remaining(),
                        cancel: Some(self.cancel.clone()),
                    };
                    async move {
                        let payload = self.inner.facade.post(GENERATION_PATH, body, options).await?;
                        GenerationResponse::single_result(payload)
                    }
                },
                options,
            )
            .await
    }
}
