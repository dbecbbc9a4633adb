//! Error types for spool-ai

use thiserror::Error;

/// Result type alias using spool-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to a model backend
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned an error response
    #[error("API error: {message} (type: {error_type})")]
    Api {
        status: Option<u16>,
        error_type: String,
        message: String,
    },

    /// Rate limit exceeded
    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Request was aborted
    #[error("Request aborted")]
    Aborted,

    /// Request did not finish in time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an API error from type and message
    pub fn api(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status: None,
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Create an API error carrying an HTTP status
    pub fn api_status(status: u16, error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status: Some(status),
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Structured timeout signal, if one is available
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Http(e) => e.is_timeout(),
            Error::Api { status, .. } => matches!(status, Some(408) | Some(504)),
            _ => false,
        }
    }

    /// Whether the failure was caused by cancellation
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted)
    }

    /// Whether repeating the same request could succeed.
    /// Credential and configuration problems never fix themselves.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::InvalidApiKey | Error::InvalidConfig(_) | Error::Aborted | Error::Json(_) => false,
            Error::Api { status, .. } => !matches!(status, Some(400) | Some(401) | Some(403) | Some(404)),
            _ => true,
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            Error::Api { status, .. } => *status,
            Error::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}
