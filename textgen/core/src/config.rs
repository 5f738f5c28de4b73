//! Client Configuration
//!
//! Settings for the HTTP facade and the orchestration layer. Values come from
//! defaults, environment variables, or the chained `with_*` builders.
//!
//! # Environment Variables
//!
//! - `GENAI_API`: API endpoint (default: `https://bam-api.res.ibm.com`)
//! - `GENAI_KEY`: API key sent as a bearer token
//! - `GENAI_REQUEST_TIMEOUT_SECS`: per-request timeout in seconds

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default API endpoint
pub const DEFAULT_ENDPOINT: &str = "https://bam-api.res.ibm.com";

/// Upper bound on how long a capacity allowance may be reused
pub const MAX_ALLOWANCE_TTL: Duration = Duration::from_secs(1);

/// Transport retry policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,

    /// Initial backoff delay
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f32,

    /// Add jitter to backoff
    pub use_jitter: bool,

    /// Retry on these status codes
    pub retry_status_codes: Vec<u16>,

    /// Retry on connection errors
    pub retry_on_connection_error: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
            retry_status_codes: vec![500, 502, 503, 504],
            retry_on_connection_error: true,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (1-based), before jitter
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = f64::from(self.backoff_multiplier).powi(exponent as i32);
        let millis = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(millis as u64)
    }

    /// Whether a response with this status should be retried
    #[must_use]
    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_status_codes.contains(&status)
    }
}

/// Configuration for a [`Client`](crate::Client)
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the API
    pub endpoint: String,
    /// Optional API key
    pub api_key: Option<String>,
    /// Default per-request timeout for the HTTP client
    pub request_timeout: Duration,
    /// How long a fetched capacity allowance is reused (at most one second)
    pub allowance_ttl: Duration,
    /// Longest pause between capacity checks while a batch input waits for budget
    pub batch_poll_interval: Duration,
    /// Transport retry policy
    pub retry: RetryConfig,
    /// User agent header
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(600),
            allowance_ttl: MAX_ALLOWANCE_TTL,
            batch_poll_interval: Duration::from_millis(1000),
            retry: RetryConfig::default(),
            user_agent: format!("textgen-core/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    /// Create a configuration pointing at `endpoint`
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    /// Create from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let endpoint =
            std::env::var("GENAI_API").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        let request_timeout = std::env::var("GENAI_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map_or(Duration::from_secs(600), Duration::from_secs);

        Self {
            api_key: std::env::var("GENAI_KEY").ok().filter(|k| !k.is_empty()),
            request_timeout,
            ..Self::new(endpoint)
        }
    }

    /// Set the API key
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the per-request timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the allowance cache lifetime (clamped to one second)
    #[must_use]
    pub fn with_allowance_ttl(mut self, ttl: Duration) -> Self {
        self.allowance_ttl = ttl.min(MAX_ALLOWANCE_TTL);
        self
    }

    /// Set the batch polling interval
    #[must_use]
    pub fn with_batch_poll_interval(mut self, interval: Duration) -> Self {
        self.batch_poll_interval = interval;
        self
    }

    /// Set the transport retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Full URL for an API path
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }
}
