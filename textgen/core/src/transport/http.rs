//! HTTP Request Facade
//!
//! `reqwest` implementation of [`RequestFacade`]. Handles authentication
//! headers, maps error statuses onto [`UpstreamError`], and retries transport
//! failures with exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, RequestBuilder};
use tokio_util::sync::CancellationToken;

use super::{RawStreamResponse, RequestFacade, RequestOptions};
use crate::budget::{self, Deadline};
use crate::config::ClientConfig;
use crate::error::{Result, SdkError, UpstreamError};

/// `reqwest`-backed request facade
#[derive(Clone, Debug)]
pub struct HttpFacade {
    /// Client configuration
    config: ClientConfig,
    /// HTTP client
    http_client: reqwest::Client,
}

impl HttpFacade {
    /// Create a facade from configuration
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .default_headers(Self::build_headers(&config)?)
            .build()
            .map_err(|e| SdkError::internal_with("failed to create HTTP client", e))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Configuration this facade was built with
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn build_headers(config: &ClientConfig) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|_| SdkError::invalid_input("user agent is not a valid header value"))?;
        headers.insert(USER_AGENT, agent);

        if let Some(ref api_key) = config.api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|_| SdkError::invalid_input("API key is not a valid header value"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http_client.request(method, self.config.url(path))
    }

    /// Per-attempt timeout: the caller's remaining budget capped by the client default
    fn attempt_timeout(&self, deadline: &Deadline) -> Duration {
        deadline
            .remaining()
            .map_or(self.config.request_timeout, |left| {
                left.min(self.config.request_timeout)
            })
    }

    fn is_retryable(&self, err: &SdkError) -> bool {
        match err {
            SdkError::Network { .. } => self.config.retry.retry_on_connection_error,
            SdkError::Upstream(upstream) => {
                self.config.retry.should_retry_status(upstream.status_code)
            }
            _ => false,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.retry.backoff_for(attempt);
        if !self.config.retry.use_jitter {
            return base;
        }
        let jitter_ms = base.as_millis() as u64 / 2;
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    async fn send_once(&self, builder: RequestBuilder) -> Result<serde_json::Value> {
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_body(status.as_u16(), &body).into());
        }

        Ok(response.json().await?)
    }

    /// Send with retry on transport errors and retryable statuses
    async fn send_json<F>(&self, build: F, options: RequestOptions) -> Result<serde_json::Value>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let deadline = Deadline::after(options.timeout);
        let cancel = options.cancel.as_ref();
        let mut attempt = 0;

        loop {
            let builder = build().timeout(self.attempt_timeout(&deadline));
            let result = budget::guarded(self.send_once(builder), cancel, deadline).await;

            match result {
                Err(err) if attempt < self.config.retry.max_retries && self.is_retryable(&err) => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    if deadline.remaining().is_some_and(|left| left <= delay) {
                        return Err(err);
                    }
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transport error, retrying after backoff"
                    );
                    budget::pause(delay, cancel, deadline).await?;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl RequestFacade for HttpFacade {
    async fn get(&self, path: &str, options: RequestOptions) -> Result<serde_json::Value> {
        self.send_json(|| self.request(Method::GET, path), options)
            .await
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
        options: RequestOptions,
    ) -> Result<serde_json::Value> {
        self.send_json(|| self.request(Method::POST, path).json(&body), options)
            .await
    }

    async fn stream_post(
        &self,
        path: &str,
        body: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<RawStreamResponse> {
        let builder = self
            .request(Method::POST, path)
            .header(ACCEPT, "text/event-stream")
            .json(&body);

        let response = budget::guarded(
            async { builder.send().await.map_err(SdkError::from) },
            Some(&cancel),
            Deadline::none(),
        )
        .await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        tracing::debug!(path, status, content_type = ?content_type, "Stream response received");

        let body = response
            .bytes_stream()
            .map_err(SdkError::from)
            .take_until(cancel.cancelled_owned())
            .boxed();

        Ok(RawStreamResponse {
            status,
            content_type,
            body,
        })
    }
}
