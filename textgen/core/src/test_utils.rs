//! Test Utilities
//!
//! Scripted [`RequestFacade`] for unit tests. Limits, unary posts and streams
//! are each driven by a closure so tests can inject latency and failures
//! without a server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SdkError};
use crate::transport::{RawStreamResponse, RequestFacade, RequestOptions};

/// A captured POST for verification
#[derive(Clone, Debug)]
pub struct PostCall {
    /// Path that was called
    pub path: String,
    /// JSON body
    pub body: serde_json::Value,
    /// Zero-based call number across the facade
    pub seq: usize,
}

type PostHandler = Arc<dyn Fn(PostCall) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync>;
type StreamHandler = Arc<dyn Fn(PostCall) -> Result<RawStreamResponse> + Send + Sync>;

/// Scripted facade
pub struct MockFacade {
    limits: Mutex<Result<serde_json::Value>>,
    limits_delay: Duration,
    post_handler: PostHandler,
    stream_handler: StreamHandler,
    /// GET calls issued
    pub get_calls: AtomicUsize,
    /// POST calls issued
    pub post_calls: AtomicUsize,
    /// Stream opens issued
    pub stream_calls: AtomicUsize,
    /// Every POST seen, in order
    pub posts: Mutex<Vec<PostCall>>,
}

impl Default for MockFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFacade {
    /// Facade with capacity 100, echoing generation results
    pub fn new() -> Self {
        Self {
            limits: Mutex::new(Ok(json!({"token_capacity": 100, "tokens_used": 0}))),
            limits_delay: Duration::ZERO,
            post_handler: Arc::new(|call| {
                async move { Ok(generation_reply(&format!("echo:{}", input_of(&call.body)))) }
                    .boxed()
            }),
            stream_handler: Arc::new(|_| Err(SdkError::internal("no stream scripted"))),
            get_calls: AtomicUsize::new(0),
            post_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            posts: Mutex::new(Vec::new()),
        }
    }

    /// Set the limits payload
    pub fn with_limits(self, payload: serde_json::Value) -> Self {
        *self.limits.lock() = Ok(payload);
        self
    }

    /// Make the limits endpoint fail
    pub fn with_limits_error(self, err: SdkError) -> Self {
        *self.limits.lock() = Err(err);
        self
    }

    /// Delay every limits fetch
    pub fn with_limits_delay(mut self, delay: Duration) -> Self {
        self.limits_delay = delay;
        self
    }

    /// Script unary posts
    pub fn on_post<F>(mut self, handler: F) -> Self
    where
        F: Fn(PostCall) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync + 'static,
    {
        self.post_handler = Arc::new(handler);
        self
    }

    /// Script stream opens
    pub fn on_stream<F>(mut self, handler: F) -> Self
    where
        F: Fn(PostCall) -> Result<RawStreamResponse> + Send + Sync + 'static,
    {
        self.stream_handler = Arc::new(handler);
        self
    }

    /// Replace the limits payload after construction
    pub fn set_limits(&self, payload: serde_json::Value) {
        *self.limits.lock() = Ok(payload);
    }

    fn record(&self, path: &str, body: serde_json::Value) -> PostCall {
        let mut posts = self.posts.lock();
        let call = PostCall {
            path: path.to_string(),
            body,
            seq: posts.len(),
        };
        posts.push(call.clone());
        call
    }
}

#[async_trait]
impl RequestFacade for MockFacade {
    async fn get(&self, _path: &str, _options: RequestOptions) -> Result<serde_json::Value> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if !self.limits_delay.is_zero() {
            tokio::time::sleep(self.limits_delay).await;
        }
        self.limits.lock().clone()
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
        _options: RequestOptions,
    ) -> Result<serde_json::Value> {
        self.post_calls.fetch_add(1, Ordering::SeqCst);
        let call = self.record(path, body);
        (self.post_handler)(call).await
    }

    async fn stream_post(
        &self,
        path: &str,
        body: serde_json::Value,
        _cancel: CancellationToken,
    ) -> Result<RawStreamResponse> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let call = self.record(path, body);
        (self.stream_handler)(call)
    }
}

/// The `input` field of a generation body
pub fn input_of(body: &serde_json::Value) -> String {
    body.get("input")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// A well-formed generation response
pub fn generation_reply(text: &str) -> serde_json::Value {
    json!({
        "id": "gen-1",
        "model_id": "test/model",
        "created_at": "2024-03-19T10:00:00Z",
        "results": [{
            "generated_text": text,
            "generated_token_count": 3,
            "input_token_count": 2,
            "stop_reason": "EOS_TOKEN"
        }]
    })
}

/// The error the server sends when its concurrency limit is hit
pub fn concurrency_limit_error() -> SdkError {
    crate::error::UpstreamError::from_payload(
        &json!({
            "status_code": 429,
            "error": "Too Many Requests",
            "message": "concurrency limit reached",
            "extensions": {"code": "TOO_MANY_REQUESTS", "reason": "CONCURRENCY_LIMIT"}
        }),
        429,
    )
    .into()
}

/// Event-stream response built from raw SSE text frames
pub fn sse_response(frames: &[&str]) -> RawStreamResponse {
    let chunks: Vec<Result<Bytes>> = frames
        .iter()
        .map(|frame| Ok(Bytes::from(frame.to_string())))
        .collect();
    RawStreamResponse {
        status: 200,
        content_type: Some("text/event-stream".to_string()),
        body: stream::iter(chunks).boxed(),
    }
}

/// Non-stream response carrying `body`
pub fn json_response(status: u16, body: &serde_json::Value) -> RawStreamResponse {
    RawStreamResponse {
        status,
        content_type: Some("application/json".to_string()),
        body: stream::iter(vec![Ok(Bytes::from(body.to_string()))]).boxed(),
    }
}
