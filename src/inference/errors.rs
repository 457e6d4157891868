//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility. These types carry the context needed to build
//! meaningful log entries and to classify transient provider conditions.

use thiserror::Error;

/// HTTP status the provider uses when the model is overloaded.
pub const STATUS_OVERLOADED: u16 = 503;

/// HTTP status the provider uses when the caller is rate limited.
pub const STATUS_RATE_LIMITED: u16 = 429;

/// Errors that can occur while talking to the model provider.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// SSE stream parsing or chunk-level error.
    #[error("stream error: {reason}")]
    StreamError {
        reason: String,
    },

    /// A non-streaming response body could not be parsed.
    #[error("invalid response: {reason}")]
    InvalidResponse {
        reason: String,
    },

    /// The provider refused the prompt.
    #[error("prompt blocked: {reason}")]
    Blocked {
        reason: String,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl InferenceError {
    /// HTTP status of the failure, if the provider answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            InferenceError::HttpError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The provider reported it is overloaded (HTTP 503).
    pub fn is_overloaded(&self) -> bool {
        self.status() == Some(STATUS_OVERLOADED)
    }

    /// The provider is throttling this caller (HTTP 429).
    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(STATUS_RATE_LIMITED)
    }

    /// Overload and rate limiting are the only conditions worth retrying.
    pub fn is_transient(&self) -> bool {
        self.is_overloaded() || self.is_rate_limited()
    }

    /// Extract the error body text, if this is an `HttpError`.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            InferenceError::HttpError { body, .. } => Some(body),
            _ => None,
        }
    }
}
