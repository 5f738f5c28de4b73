//! Generation stream

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};

use super::types::{GenerationChunk, GenerationResult, StreamChunk};
use crate::error::Result;
use crate::streaming::{PushSequence, StreamState};

/// Normalized partial results of a single streamed generation.
///
/// Ends after the server's close event. Dropping the stream aborts the
/// connection.
#[derive(Debug)]
pub struct GenerationStream {
    events: PushSequence<StreamChunk>,
}

impl GenerationStream {
    pub(super) fn new(events: PushSequence<StreamChunk>) -> Self {
        Self { events }
    }

    /// Abort the connection. The stream ends without an error.
    pub fn cancel(&mut self) {
        self.events.cancel();
    }

    /// Connection state
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.events.state()
    }

    /// Drain the stream into one accumulated result
    pub async fn accumulate(mut self) -> Result<GenerationResult> {
        let mut total = GenerationResult::default();
        while let Some(chunk) = self.next().await {
            total.absorb(&chunk?.result);
        }
        Ok(total)
    }
}

impl Stream for GenerationStream {
    type Item = Result<GenerationChunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events
            .poll_next_unpin(cx)
            .map(|item| item.map(|chunk| chunk.map(StreamChunk::normalize)))
    }
}
