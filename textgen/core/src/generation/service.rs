//! Generation Service
//!
//! Entry point for text generation. Two mutually exclusive modes:
//!
//! - **Batch** ([`GenerationService::create`]): any number of inputs, each
//!   admitted against the shared token budget and sent through the generation
//!   limiter. Outcomes settle strictly left to right.
//! - **Stream** ([`GenerationService::create_stream`]): exactly one input,
//!   delivered as normalized partial results.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::batch::{spawn_batch, GenerationHandle};
use super::stream::GenerationStream;
use super::types::{GenerationChunk, GenerationRequest, GenerationResult, StreamChunk};
use crate::budget::Deadline;
use crate::capacity::CapacityProbe;
use crate::config::ClientConfig;
use crate::error::{Result, SdkError};
use crate::limiter::ConcurrencyLimiter;
use crate::streaming::open_event_stream;
use crate::transport::RequestFacade;

/// Unary generation endpoint
pub const GENERATION_PATH: &str = "/v2/text/generation?version=2024-03-19";

/// Streaming generation endpoint
pub const GENERATION_STREAM_PATH: &str = "/v2/text/generation_stream?version=2024-03-19";

/// Generation limits endpoint
pub const GENERATION_LIMITS_PATH: &str = "/v2/text/generation/limits?version=2023-11-22";

/// Budget reserved per pending input.
///
/// A flat placeholder until requests carry a real token estimate.
pub const TOKEN_COST_PER_INPUT: u64 = 1;

/// Options for a batch call
#[derive(Clone, Debug, Default)]
pub struct BatchOptions {
    /// Cancels every input not yet settled
    pub cancel: Option<CancellationToken>,
    /// Wall-clock budget for the whole call, from the moment it is made
    pub timeout: Option<Duration>,
}

impl BatchOptions {
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

/// Options for a streaming call
#[derive(Clone, Debug, Default)]
pub struct StreamOptions {
    /// Aborts the stream
    pub cancel: Option<CancellationToken>,
}

impl StreamOptions {
    /// Set the cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

pub(super) struct ServiceInner {
    pub(super) facade: Arc<dyn RequestFacade>,
    pub(super) probe: Arc<CapacityProbe>,
    pub(super) limiter: ConcurrencyLimiter,
    pub(super) poll_interval: Duration,
}

/// Text generation with capacity-aware batching and streaming
#[derive(Clone)]
pub struct GenerationService {
    inner: Arc<ServiceInner>,
}

impl std::fmt::Debug for GenerationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationService")
            .field("probe", &self.inner.probe)
            .field("limiter", &self.inner.limiter)
            .finish_non_exhaustive()
    }
}

impl GenerationService {
    /// Create a service over `facade`
    pub fn new(facade: Arc<dyn RequestFacade>, config: &ClientConfig) -> Self {
        let probe = Arc::new(CapacityProbe::new(
            Arc::clone(&facade),
            GENERATION_LIMITS_PATH,
            config.allowance_ttl,
        ));
        let limiter = ConcurrencyLimiter::new("generation", Arc::clone(&probe));

        Self {
            inner: Arc::new(ServiceInner {
                facade,
                probe,
                limiter,
                poll_interval: config.batch_poll_interval,
            }),
        }
    }

    /// The limiter guarding unary generation requests
    #[must_use]
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.inner.limiter
    }

    /// The probe reading the generation limits endpoint
    #[must_use]
    pub fn probe(&self) -> &CapacityProbe {
        &self.inner.probe
    }

    /// Start a batch and return one handle per input, in input order.
    ///
    /// Work begins immediately on the current tokio runtime. Each handle
    /// resolves only after every handle before it has resolved, so awaiting
    /// them in sequence observes outcomes left to right. A failing input does
    /// not affect its siblings; cancelling `options.cancel` affects them all.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn create(&self, inputs: Vec<GenerationRequest>, options: BatchOptions) -> Vec<GenerationHandle> {
        let deadline = Deadline::after(options.timeout);
        let cancel = options.cancel.unwrap_or_default();
        spawn_batch(&self.inner, inputs, TOKEN_COST_PER_INPUT, &cancel, deadline)
    }

    /// Generate for a single input
    pub async fn create_one(
        &self,
        input: GenerationRequest,
        options: BatchOptions,
    ) -> Result<GenerationResult> {
        match self.create(vec![input], options).into_iter().next() {
            Some(handle) => handle.await,
            None => Err(SdkError::internal("batch of one produced no handle")),
        }
    }

    /// Run a batch, invoking `callback` once per input in settlement order
    pub async fn create_with_callback<F>(
        &self,
        inputs: Vec<GenerationRequest>,
        options: BatchOptions,
        mut callback: F,
    ) where
        F: FnMut(usize, Result<GenerationResult>),
    {
        for handle in self.create(inputs, options) {
            let index = handle.index();
            callback(index, handle.await);
        }
    }

    /// Open a stream for exactly one input.
    ///
    /// Any other number of inputs is rejected before a request is made.
    pub fn create_stream(
        &self,
        inputs: Vec<GenerationRequest>,
        options: StreamOptions,
    ) -> Result<GenerationStream> {
        let [input] = <[GenerationRequest; 1]>::try_from(inputs).map_err(|inputs| {
            SdkError::invalid_input(format!(
                "streaming accepts exactly one input, got {}",
                inputs.len()
            ))
        })?;
        self.stream(input, options)
    }

    /// Open a stream for `input`
    pub fn stream(&self, input: GenerationRequest, options: StreamOptions) -> Result<GenerationStream> {
        let body = input.to_body()?;
        let token = options
            .cancel
            .map_or_else(CancellationToken::new, |parent| parent.child_token());

        let events = open_event_stream::<StreamChunk>(
            Arc::clone(&self.inner.facade),
            GENERATION_STREAM_PATH,
            body,
            token,
        );
        Ok(GenerationStream::new(events))
    }

    /// Stream `input`, invoking `callback` per chunk and then once with `Ok(None)`.
    ///
    /// On failure the callback receives the error and no end marker.
    pub async fn stream_with_callback<F>(
        &self,
        input: GenerationRequest,
        options: StreamOptions,
        mut callback: F,
    ) where
        F: FnMut(Result<Option<GenerationChunk>>),
    {
        let mut stream = match self.stream(input, options) {
            Ok(stream) => stream,
            Err(err) => return callback(Err(err)),
        };

        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => callback(Ok(Some(chunk))),
                Err(err) => return callback(Err(err)),
            }
        }
        callback(Ok(None));
    }
}
