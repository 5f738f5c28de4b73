//! Request Facade
//!
//! The orchestration layer never talks to `reqwest` directly. It goes through
//! the [`RequestFacade`] trait so the limiter, scheduler and streaming pipeline
//! can be driven by any transport (the HTTP implementation, or a scripted
//! facade in tests).
//!
//! # Contract
//!
//! - Non-success responses surface as [`SdkError::Upstream`](crate::SdkError::Upstream)
//! - Transport failures surface as [`SdkError::Network`](crate::SdkError::Network)
//! - `stream_post` hands back the raw response; deciding whether it is an
//!   event stream is the streaming pipeline's job

mod http;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub use http::HttpFacade;

/// Per-call options for unary requests
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// Time allowed for this call
    pub timeout: Option<Duration>,
    /// Cooperative cancellation
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    /// Options with a timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Options with a cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Raw response of a streaming request
pub struct RawStreamResponse {
    /// HTTP status
    pub status: u16,
    /// `Content-Type` header, if any
    pub content_type: Option<String>,
    /// Response body chunks
    pub body: BoxStream<'static, Result<Bytes>>,
}

impl std::fmt::Debug for RawStreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawStreamResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

impl RawStreamResponse {
    /// Whether the response announces a server-sent-event stream
    #[must_use]
    pub fn is_event_stream(&self) -> bool {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|media| media.trim().eq_ignore_ascii_case("text/event-stream"))
    }
}

/// Transport used by the orchestration layer
#[async_trait]
pub trait RequestFacade: Send + Sync {
    /// Issue a GET and decode the JSON body
    async fn get(&self, path: &str, options: RequestOptions) -> Result<serde_json::Value>;

    /// Issue a POST with a JSON body and decode the JSON response
    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
        options: RequestOptions,
    ) -> Result<serde_json::Value>;

    /// Open a streaming POST
    ///
    /// Cancelling `cancel` aborts the underlying connection.
    async fn stream_post(
        &self,
        path: &str,
        body: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<RawStreamResponse>;
}
