//! Text generation
//!
//! Batch scheduling against the server's token budget, and single-input
//! streaming of partial results.

mod batch;
mod ledger;
mod service;
mod stream;
mod types;

pub use batch::GenerationHandle;
pub use ledger::TokenBudgetLedger;
pub use service::{
    BatchOptions, GenerationService, StreamOptions, GENERATION_LIMITS_PATH, GENERATION_PATH,
    GENERATION_STREAM_PATH, TOKEN_COST_PER_INPUT,
};
pub use stream::GenerationStream;
pub use types::{
    GenerationChunk, GenerationRequest, GenerationResponse, GenerationResult, GenerationTarget,
    StopReason, StreamChunk,
};
