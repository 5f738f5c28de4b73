//! Error Taxonomy
//!
//! Every failure surfaced by the SDK core is an [`SdkError`]. The variants map
//! one-to-one onto [`ErrorKind`], which callers can match exhaustively without
//! caring about the payload each variant carries.
//!
//! # Retry discriminants
//!
//! Two upstream conditions are treated specially by the core:
//!
//! - [`SdkError::is_concurrency_limit`]: the server rejected the request
//!   because a global concurrency limit was hit. The limiter retries these
//!   transparently.
//! - [`SdkError::is_too_many_requests`]: any 429 style rejection. The batch
//!   scheduler drops its cached allowance and checks capacity again.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

/// Reason string the server uses for the shared concurrency limit
pub const CONCURRENCY_LIMIT_REASON: &str = "CONCURRENCY_LIMIT";

/// Error code the server uses for throttled requests
pub const TOO_MANY_REQUESTS_CODE: &str = "TOO_MANY_REQUESTS";

/// A specialized Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;

/// Discriminant of an [`SdkError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller violated a precondition
    InvalidInput,
    /// Server answered with an error status
    Upstream,
    /// Transport-level failure
    Network,
    /// The core's own wall-clock budget ran out
    Timeout,
    /// The caller's cancellation token fired
    Cancelled,
    /// The core's own invariant was violated
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidInput => "invalid_input",
            Self::Upstream => "upstream",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Structured payload of a server error response
#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamError {
    /// HTTP status code
    pub status_code: u16,
    /// Application error code (`extensions.code`)
    pub error_code: Option<String>,
    /// Reason (`extensions.reason`, falling back to the error code)
    pub reason: Option<String>,
    /// Opaque state attached by the server
    pub state: Option<serde_json::Value>,
    /// Human readable message
    pub message: String,
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}", self.status_code)?;
        if let Some(ref reason) = self.reason {
            write!(f, " ({reason})")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Wire shape of an error body
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    status_code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    extensions: Option<ErrorExtensions>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorExtensions {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    state: Option<serde_json::Value>,
}

impl UpstreamError {
    /// Create an upstream error with just a status and message
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            error_code: None,
            reason: None,
            state: None,
            message: message.into(),
        }
    }

    /// Set the application error code
    #[must_use]
    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    /// Set the reason
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Build from a JSON error payload.
    ///
    /// `fallback_status` is used when the payload carries no `status_code`
    /// (for example the HTTP status of the response that delivered it).
    pub fn from_payload(payload: &serde_json::Value, fallback_status: u16) -> Self {
        let body: ErrorBody = serde_json::from_value(payload.clone()).unwrap_or_default();
        let extensions = body.extensions.unwrap_or_default();
        let message = body
            .message
            .or(body.error)
            .unwrap_or_else(|| payload.to_string());

        Self {
            status_code: body.status_code.unwrap_or(fallback_status),
            reason: extensions.reason.or_else(|| extensions.code.clone()),
            error_code: extensions.code,
            state: extensions.state,
            message,
        }
    }

    /// Build from a raw response body that may or may not be JSON
    pub fn from_body(status: u16, body: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(payload) if payload.is_object() => Self::from_payload(&payload, status),
            _ => Self::new(status, body.trim()),
        }
    }
}

/// Error type for SDK operations
#[derive(Clone, Debug, Error)]
pub enum SdkError {
    /// Caller violated a precondition
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Server answered with an error status
    #[error("upstream error: {0}")]
    Upstream(UpstreamError),

    /// Transport-level failure
    #[error("network error: {message}")]
    Network {
        /// Description of the failure
        message: String,
        /// Original transport error
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },

    /// Wall-clock budget exhausted
    #[error("operation timed out")]
    Timeout,

    /// Cancellation token fired
    #[error("operation cancelled")]
    Cancelled,

    /// Invariant violated inside the core
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant
        message: String,
        /// Original cause, if any
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },
}

impl SdkError {
    /// Discriminant of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::Network { .. } => ErrorKind::Network,
            Self::Timeout => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a network error without an underlying cause
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error without an underlying cause
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error wrapping a cause
    pub fn internal_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Upstream payload, if this is an upstream error
    #[must_use]
    pub fn upstream(&self) -> Option<&UpstreamError> {
        match self {
            Self::Upstream(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the server rejected the call because of its shared concurrency limit
    #[must_use]
    pub fn is_concurrency_limit(&self) -> bool {
        self.upstream()
            .and_then(|err| err.reason.as_deref())
            .is_some_and(|reason| reason == CONCURRENCY_LIMIT_REASON)
    }

    /// Whether the server throttled the call (429 or `TOO_MANY_REQUESTS`)
    #[must_use]
    pub fn is_too_many_requests(&self) -> bool {
        self.upstream().is_some_and(|err| {
            err.status_code == 429 || err.error_code.as_deref() == Some(TOO_MANY_REQUESTS_CODE)
        })
    }
}

impl From<UpstreamError> for SdkError {
    fn from(err: UpstreamError) -> Self {
        Self::Upstream(err)
    }
}

impl From<reqwest::Error> for SdkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::internal_with("failed to decode response body", err);
        }
        Self::Network {
            message: err.to_string(),
            source: Some(Arc::new(err)),
        }
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal_with("unexpected payload shape", err)
    }
}
