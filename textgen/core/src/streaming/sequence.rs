//! Cancelable push sequence
//!
//! The producer pushes typed values into an unbounded channel, the consumer
//! pulls them through [`futures::Stream`]. Nothing is dropped when the consumer
//! is slower than the producer; values queue until read.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SdkError};

/// Lifecycle of a stream connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// Request issued, response not yet judged
    Connecting,
    /// Event stream established, values flowing
    Open,
    /// Finished normally or cancelled
    Closed,
    /// Finished with an error
    Errored,
}

impl StreamState {
    /// Whether no further transitions can happen
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

/// Shared view of a stream's [`StreamState`]
#[derive(Clone, Debug)]
pub struct StateCell(Arc<Mutex<StreamState>>);

impl StateCell {
    /// Cell starting in `Connecting`
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(StreamState::Connecting)))
    }

    /// Current state
    #[must_use]
    pub fn get(&self) -> StreamState {
        *self.0.lock()
    }

    /// Move to `next` unless already terminal. Returns whether it moved.
    pub fn transition(&self, next: StreamState) -> bool {
        let mut state = self.0.lock();
        if state.is_terminal() {
            return false;
        }
        tracing::debug!(from = ?*state, to = ?next, "Stream state transition");
        *state = next;
        true
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer half of a [`PushSequence`]
#[derive(Debug)]
pub struct Pusher<T> {
    tx: mpsc::UnboundedSender<Result<T>>,
    token: CancellationToken,
    state: StateCell,
}

impl<T> Pusher<T> {
    /// Push a value. Returns `false` once the consumer is gone.
    pub fn push(&self, value: T) -> bool {
        self.tx.send(Ok(value)).is_ok()
    }

    /// Terminate with an error
    pub fn fail(self, err: SdkError) {
        if self.state.transition(StreamState::Errored) {
            tracing::debug!(error = %err, "Stream errored");
            let _ = self.tx.send(Err(err));
        }
    }

    /// Terminate normally
    pub fn close(self) {
        self.state.transition(StreamState::Closed);
    }

    /// Stop producing because the token fired.
    ///
    /// The state is left for the consumer to settle, so a consumer waiting on
    /// a value still observes the cancellation.
    pub fn abandon(self) {
        tracing::debug!(state = ?self.state.get(), "Stream producer cancelled");
    }

    /// Cancellation token shared with the consumer
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// State cell shared with the consumer
    #[must_use]
    pub fn state(&self) -> &StateCell {
        &self.state
    }
}

/// Consumer half: a finite, non-restartable, cancelable stream of values
#[derive(Debug)]
pub struct PushSequence<T> {
    rx: mpsc::UnboundedReceiver<Result<T>>,
    token: CancellationToken,
    state: StateCell,
    /// Consumer's last poll returned `Pending`
    awaiting: bool,
    /// Consumer cancelled the sequence itself
    cancelled_locally: bool,
    finished: bool,
}

/// Create a connected producer/consumer pair.
///
/// `token` is owned by the pair: cancelling it (from either side, or from a
/// parent token) ends the sequence.
#[must_use]
pub fn channel<T>(token: CancellationToken) -> (Pusher<T>, PushSequence<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = StateCell::new();
    (
        Pusher {
            tx,
            token: token.clone(),
            state: state.clone(),
        },
        PushSequence {
            rx,
            token,
            state,
            awaiting: false,
            cancelled_locally: false,
            finished: false,
        },
    )
}

impl<T> PushSequence<T> {
    /// Current connection state
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state.get()
    }

    /// Stop the sequence and abort the underlying connection.
    ///
    /// No further values are yielded and no error is raised.
    pub fn cancel(&mut self) {
        self.cancelled_locally = true;
        self.token.cancel();
        self.state.transition(StreamState::Closed);
    }

    /// Whether cancellation was requested from any side
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn finish<R>(&mut self, item: Option<R>) -> Poll<Option<R>> {
        self.finished = true;
        self.awaiting = false;
        Poll::Ready(item)
    }

    /// Whether a fired token should end the sequence now. A producer that
    /// already finished keeps its buffered values and error.
    fn cancel_pending(&self) -> bool {
        self.cancelled_locally || (self.token.is_cancelled() && !self.state.get().is_terminal())
    }

    /// Outcome once the token has fired: an error only for a consumer that
    /// was already waiting on a value
    fn on_cancelled(&mut self) -> Poll<Option<Result<T>>> {
        self.state.transition(StreamState::Closed);
        if self.awaiting && !self.cancelled_locally {
            self.finish(Some(Err(SdkError::Cancelled)))
        } else {
            self.finish(None)
        }
    }
}

impl<T> Stream for PushSequence<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.finished {
            return Poll::Ready(None);
        }
        if this.cancel_pending() {
            return this.on_cancelled();
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(value))) => {
                this.awaiting = false;
                Poll::Ready(Some(Ok(value)))
            }
            Poll::Ready(Some(Err(err))) => this.finish(Some(Err(err))),
            Poll::Ready(None) if this.cancel_pending() => this.on_cancelled(),
            Poll::Ready(None) => this.finish(None),
            Poll::Pending => {
                this.awaiting = true;
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for PushSequence<T> {
    fn drop(&mut self) {
        if !self.state.get().is_terminal() {
            self.token.cancel();
        }
    }
}
