//! Server-sent-event pipeline
//!
//! Opens a stream through the [`RequestFacade`] and pumps its events into a
//! [`PushSequence`] from a background task.
//!
//! ```text
//! Connecting ──event-stream──▶ Open ──close event / end of body──▶ Closed
//!     │                         │
//!     └──other content type──▶ Errored ◀──error event / bad payload──┘
//! ```
//!
//! Cancelling the sequence's token aborts the connection from either state.

use std::sync::Arc;

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use super::sequence::{self, PushSequence, Pusher, StreamState};
use crate::error::{SdkError, UpstreamError};
use crate::transport::{RawStreamResponse, RequestFacade};

/// Event type the server sends once a stream is complete
const CLOSE_EVENT: &str = "close";

/// Event type carrying an application error payload
const ERROR_EVENT: &str = "error";

/// Status assumed for error events that carry none
const ERROR_EVENT_STATUS: u16 = 500;

/// What one inbound event means for the consumer
enum Frame<T> {
    Value(T),
    Skip,
    Close,
    Fail(SdkError),
}

/// Open an event stream at `path` and expose it as a typed sequence.
///
/// `cancel` becomes the sequence's token. Pass a child of a caller token to
/// let the caller abort the connection.
pub fn open_event_stream<T>(
    facade: Arc<dyn RequestFacade>,
    path: impl Into<String>,
    body: serde_json::Value,
    cancel: CancellationToken,
) -> PushSequence<T>
where
    T: DeserializeOwned + Send + 'static,
{
    let (pusher, sequence) = sequence::channel(cancel);
    let path = path.into();
    tokio::spawn(async move {
        produce(facade, path, body, pusher).await;
    });
    sequence
}

async fn produce<T>(
    facade: Arc<dyn RequestFacade>,
    path: String,
    body: serde_json::Value,
    pusher: Pusher<T>,
) where
    T: DeserializeOwned,
{
    let token = pusher.token().clone();
    tracing::debug!(path = %path, "Opening event stream");

    let opened = tokio::select! {
        biased;
        () = token.cancelled() => return pusher.abandon(),
        opened = facade.stream_post(&path, body, token.clone()) => opened,
    };
    let response = match opened {
        Ok(response) => response,
        Err(err) => return pusher.fail(err),
    };

    if !response.is_event_stream() {
        let err = tokio::select! {
            biased;
            () = token.cancelled() => return pusher.abandon(),
            err = rejection(response) => err,
        };
        return pusher.fail(err);
    }

    pusher.state().transition(StreamState::Open);
    let mut events = response.body.eventsource();

    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => return pusher.abandon(),
            next = events.next() => next,
        };

        let frame = match next {
            None => Frame::Close,
            Some(Ok(event)) => classify(&event),
            Some(Err(err)) => Frame::Fail(from_event_stream_error(err)),
        };

        match frame {
            Frame::Value(value) => {
                if !pusher.push(value) {
                    tracing::debug!(path = %path, "Consumer dropped, closing stream");
                    return;
                }
            }
            Frame::Skip => {}
            Frame::Close => return pusher.close(),
            Frame::Fail(err) => return pusher.fail(err),
        }
    }
}

/// Error for a response that is not an event stream
async fn rejection(mut response: RawStreamResponse) -> SdkError {
    let mut raw = Vec::new();
    while let Some(chunk) = response.body.next().await {
        match chunk {
            Ok(bytes) => raw.extend_from_slice(&bytes),
            Err(err) => return err,
        }
    }
    let text = String::from_utf8_lossy(&raw);
    UpstreamError::from_body(response.status, &text).into()
}

fn classify<T: DeserializeOwned>(event: &Event) -> Frame<T> {
    if event.event == CLOSE_EVENT {
        return Frame::Close;
    }
    if event.data.trim().is_empty() {
        return Frame::Skip;
    }

    let payload: serde_json::Value = match serde_json::from_str(&event.data) {
        Ok(payload) => payload,
        Err(err) => {
            return Frame::Fail(SdkError::internal_with("unparsable stream event", err));
        }
    };

    if event.event == ERROR_EVENT {
        return Frame::Fail(UpstreamError::from_payload(&payload, ERROR_EVENT_STATUS).into());
    }

    match serde_json::from_value(payload) {
        Ok(value) => Frame::Value(value),
        Err(err) => Frame::Fail(SdkError::internal_with("unexpected stream event shape", err)),
    }
}

fn from_event_stream_error(err: EventStreamError<SdkError>) -> SdkError {
    match err {
        EventStreamError::Transport(err) => err,
        EventStreamError::Utf8(err) => SdkError::internal_with("stream is not valid UTF-8", err),
        EventStreamError::Parser(err) => SdkError::internal(format!("malformed event stream: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{json_response, sse_response, MockFacade};
    use crate::ErrorKind;
    use bytes::Bytes;
    use futures::stream;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn open(facade: MockFacade, cancel: CancellationToken) -> PushSequence<Value> {
        open_event_stream(Arc::new(facade), "/v2/stream", json!({"input": "x"}), cancel)
    }

    #[tokio::test]
    async fn test_values_until_close_event() {
        let facade = MockFacade::new().on_stream(|_| {
            Ok(sse_response(&[
                "data: {\"generated_text\":\"foo\"}\n\n",
                "data: {\"generated_text\":\"bar\"}\n\n",
                "event: close\ndata: \n\n",
                "data: {\"generated_text\":\"never\"}\n\n",
            ]))
        });
        let mut seq = open(facade, CancellationToken::new());

        let mut values = Vec::new();
        while let Some(item) = seq.next().await {
            values.push(item.unwrap());
        }
        assert_eq!(
            values,
            vec![json!({"generated_text": "foo"}), json!({"generated_text": "bar"})]
        );
        assert_eq!(seq.state(), StreamState::Closed);
    }

    #[tokio::test]
    async fn test_empty_payloads_are_skipped() {
        let facade = MockFacade::new().on_stream(|_| {
            Ok(sse_response(&[
                ": keep-alive\n\n",
                "data: \n\n",
                "data: {\"n\":1}\n\n",
            ]))
        });
        let values: Vec<_> = open(facade, CancellationToken::new()).collect().await;
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].as_ref().unwrap(), &json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_non_event_stream_response_is_upstream_error() {
        let facade = MockFacade::new().on_stream(|_| {
            Ok(json_response(
                404,
                &json!({
                    "status_code": 404,
                    "message": "Model not found",
                    "extensions": {"code": "NOT_FOUND"}
                }),
            ))
        });
        let mut seq = open(facade, CancellationToken::new());

        let err = seq.next().await.unwrap().unwrap_err();
        let upstream = err.upstream().unwrap();
        assert_eq!(upstream.status_code, 404);
        assert_eq!(upstream.reason.as_deref(), Some("NOT_FOUND"));
        assert!(seq.next().await.is_none());
        assert_eq!(seq.state(), StreamState::Errored);
    }

    #[tokio::test]
    async fn test_plain_text_rejection() {
        let facade = MockFacade::new().on_stream(|_| {
            Ok(RawStreamResponse {
                status: 502,
                content_type: Some("text/plain".to_string()),
                body: stream::iter(vec![Ok(Bytes::from_static(b"bad gateway\n"))]).boxed(),
            })
        });
        let err = open(facade, CancellationToken::new())
            .next()
            .await
            .unwrap()
            .unwrap_err();
        let upstream = err.upstream().unwrap();
        assert_eq!(upstream.status_code, 502);
        assert_eq!(upstream.message, "bad gateway");
    }

    #[tokio::test]
    async fn test_error_event_is_upstream_error() {
        let facade = MockFacade::new().on_stream(|_| {
            Ok(sse_response(&[
                "data: {\"generated_text\":\"a\"}\n\n",
                "event: error\ndata: {\"status_code\":503,\"message\":\"overloaded\"}\n\n",
            ]))
        });
        let mut seq = open(facade, CancellationToken::new());

        assert!(seq.next().await.unwrap().is_ok());
        let err = seq.next().await.unwrap().unwrap_err();
        assert_eq!(err.upstream().map(|e| e.status_code), Some(503));
        assert!(seq.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unparsable_payload_is_internal() {
        let facade = MockFacade::new().on_stream(|_| Ok(sse_response(&["data: {not json\n\n"])));
        let err = open(facade, CancellationToken::new())
            .next()
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_open_failure_propagates() {
        let facade = MockFacade::new().on_stream(|_| Err(SdkError::network("connection reset")));
        let mut seq = open(facade, CancellationToken::new());
        assert_eq!(seq.next().await.unwrap().unwrap_err().kind(), ErrorKind::Network);
        assert_eq!(seq.state(), StreamState::Errored);
    }

    #[tokio::test]
    async fn test_cancel_before_open_issues_no_request() {
        let facade = Arc::new(MockFacade::new().on_stream(|_| Ok(sse_response(&[]))));
        let token = CancellationToken::new();
        token.cancel();

        let mut seq: PushSequence<Value> =
            open_event_stream(facade.clone(), "/v2/stream", json!({}), token);
        assert!(seq.next().await.is_none());
        tokio::task::yield_now().await;
        assert_eq!(
            facade.stream_calls.load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }

    #[tokio::test]
    async fn test_parent_cancel_while_waiting_raises_cancelled() {
        let facade = MockFacade::new().on_stream(|_| {
            Ok(RawStreamResponse {
                status: 200,
                content_type: Some("text/event-stream".to_string()),
                body: stream::iter(vec![Ok(Bytes::from_static(b"data: {\"n\":1}\n\n"))])
                    .chain(stream::pending())
                    .boxed(),
            })
        });
        let parent = CancellationToken::new();
        let mut seq = open(facade, parent.child_token());
        assert_eq!(seq.next().await.unwrap().unwrap(), json!({"n": 1}));

        let canceller = async {
            tokio::task::yield_now().await;
            parent.cancel();
        };
        let (item, ()) = tokio::join!(seq.next(), canceller);

        assert_eq!(item.unwrap().unwrap_err().kind(), ErrorKind::Cancelled);
        assert!(seq.next().await.is_none());
        assert_eq!(seq.state(), StreamState::Closed);
    }

    #[tokio::test]
    async fn test_consumer_cancel_aborts_connection() {
        let facade = MockFacade::new().on_stream(|_| {
            Ok(RawStreamResponse {
                status: 200,
                content_type: Some("text/event-stream".to_string()),
                body: stream::iter(vec![Ok(Bytes::from_static(b"data: {\"n\":1}\n\n"))])
                    .chain(stream::pending())
                    .boxed(),
            })
        });
        let token = CancellationToken::new();
        let mut seq = open(facade, token.clone());

        assert_eq!(seq.next().await.unwrap().unwrap(), json!({"n": 1}));
        seq.cancel();
        assert!(token.is_cancelled());
        assert!(seq.next().await.is_none());
        assert_eq!(seq.state(), StreamState::Closed);
    }
}
