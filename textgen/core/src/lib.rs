//! textgen-core - Concurrency-aware client core for a hosted text generation API
//!
//! Multiplexes many generation requests over a concurrency and token budget
//! that the server declares at runtime, and delivers results either as
//! ordered futures or as a cancelable stream of partial results.
//!
//! # Architecture
//!
//! ```text
//!   caller
//!     │
//!     ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │                    GenerationService                       │
//! │   batch: admit per input ─────────┐    stream: one input   │
//! │   (TokenBudgetLedger)             │          │             │
//! └───────────────┬───────────────────┼──────────┼─────────────┘
//!                 │                   ▼          ▼
//!                 │        ┌───────────────┐  ┌──────────────────┐
//!                 │        │ Concurrency   │  │ Event stream     │
//!                 │        │ Limiter       │  │ pipeline (SSE)   │
//!                 │        └──────┬────────┘  └────────┬─────────┘
//!                 ▼               │                    │
//!          ┌──────────────┐       │                    │
//!          │CapacityProbe │◀──────┘                    │
//!          └──────┬───────┘                            │
//!                 ▼                                    ▼
//!          ┌───────────────────────────────────────────────────┐
//!          │        RequestFacade (HttpFacade / scripted)      │
//!          └───────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Client`]: bundles a transport with the generation and embedding services
//! - [`GenerationService`]: batch and streaming generation
//! - [`ConcurrencyLimiter`]: server-sized worker pool with transparent
//!   concurrency-limit retries
//! - [`CapacityProbe`]: cached, deduplicated reads of a limits endpoint
//! - [`PushSequence`]: cancelable sequence fed by a background producer
//! - [`SdkError`]: every failure, discriminated by [`ErrorKind`]
//!
//! # Quick Start
//!
//! ```ignore
//! use textgen_core::{BatchOptions, Client, ClientConfig, GenerationRequest};
//!
//! #[tokio::main]
//! async fn main() -> textgen_core::Result<()> {
//!     let client = Client::new(ClientConfig::from_env())?;
//!
//!     let inputs = vec![
//!         GenerationRequest::for_model("google/flan-t5-xl", "Hello"),
//!         GenerationRequest::for_model("google/flan-t5-xl", "World"),
//!     ];
//!     for handle in client.generation().create(inputs, BatchOptions::default()) {
//!         println!("{}", handle.await?.generated_text);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! The library emits `tracing` events and never installs a subscriber.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod budget;
pub mod capacity;
pub mod client;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod generation;
pub mod limiter;
pub mod streaming;
pub mod transport;

#[cfg(test)]
pub mod test_utils;

pub use budget::Deadline;
pub use capacity::{CapacityAllowance, CapacityProbe};
pub use client::Client;
pub use config::{ClientConfig, RetryConfig};
pub use embeddings::{EmbeddingRequest, EmbeddingService};
pub use error::{ErrorKind, Result, SdkError, UpstreamError};
pub use generation::{
    BatchOptions, GenerationChunk, GenerationHandle, GenerationRequest, GenerationResult,
    GenerationService, GenerationStream, GenerationTarget, StopReason, StreamOptions,
};
pub use limiter::{ConcurrencyLimiter, ExecuteOptions, LimiterPhase, LimiterStats};
pub use streaming::{PushSequence, StreamState};
pub use transport::{HttpFacade, RawStreamResponse, RequestFacade, RequestOptions};
