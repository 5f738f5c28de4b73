//! Streaming responses
//!
//! - `sequence`: the cancelable push sequence handed to consumers
//! - `pipeline`: server-sent-event consumption feeding a sequence

mod pipeline;
mod sequence;

pub use pipeline::open_event_stream;
pub use sequence::{channel, PushSequence, Pusher, StateCell, StreamState};
