//! Error taxonomy for session execution

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use thiserror::Error;

/// Result type alias using the session error taxonomy
pub type Result<T> = std::result::Result<T, TaskError>;

/// The closed set of failure kinds a session can surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    Aborted,
    ConsecutiveMistakeLimitReached,
    ApiTimeout,
    ApiRequestFailed,
    NoApiResponse,
    NoToolsUsed,
    StreamingFailed,
    MaxRetryExceeded,
}

impl TaskErrorKind {
    /// Whether a failure of this kind may be retried with the same input
    pub fn is_retryable(self) -> bool {
        match self {
            TaskErrorKind::ApiTimeout
            | TaskErrorKind::ApiRequestFailed
            | TaskErrorKind::NoApiResponse
            | TaskErrorKind::NoToolsUsed
            | TaskErrorKind::StreamingFailed => true,
            TaskErrorKind::Aborted
            | TaskErrorKind::ConsecutiveMistakeLimitReached
            | TaskErrorKind::MaxRetryExceeded => false,
        }
    }

    /// Whether retries of this kind wait with exponential backoff.
    /// Only backend failures back off; a missing tool call retries at once.
    pub fn backs_off(self) -> bool {
        self.is_retryable() && self != TaskErrorKind::NoToolsUsed
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskErrorKind::Aborted => "aborted",
            TaskErrorKind::ConsecutiveMistakeLimitReached => "consecutive_mistake_limit_reached",
            TaskErrorKind::ApiTimeout => "api_timeout",
            TaskErrorKind::ApiRequestFailed => "api_request_failed",
            TaskErrorKind::NoApiResponse => "no_api_response",
            TaskErrorKind::NoToolsUsed => "no_tools_used",
            TaskErrorKind::StreamingFailed => "streaming_failed",
            TaskErrorKind::MaxRetryExceeded => "max_retry_exceeded",
        }
    }
}

impl std::fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised at a session failure boundary
#[derive(Error, Debug)]
pub enum TaskError {
    /// The session was aborted
    #[error("Task aborted: {reason}")]
    Aborted { reason: String },

    /// Too many turns in a row produced no usable tool call
    #[error("Consecutive mistake limit reached ({limit} turns without a usable tool call)")]
    ConsecutiveMistakeLimitReached { limit: u32 },

    /// The request did not complete within the session timeout
    #[error("API request timed out: {message}")]
    ApiTimeout {
        message: String,
        #[source]
        source: Option<spool_ai::Error>,
    },

    /// The backend rejected or failed the request before streaming content
    #[error("API request failed: {message}")]
    ApiRequestFailed {
        message: String,
        #[source]
        source: Option<spool_ai::Error>,
    },

    /// The stream ended without any content
    #[error("No response from the model backend")]
    NoApiResponse,

    /// The model answered without using a tool
    #[error("The model responded without using a tool")]
    NoToolsUsed,

    /// The stream failed after content had started arriving
    #[error("Streaming failed: {message}")]
    StreamingFailed {
        code: Option<String>,
        message: String,
    },

    /// Retry budget exhausted; carries every error collected in order
    #[error(
        "Maximum retry attempts ({attempts}) exceeded after {} errors; last error: {}",
        .errors.len(),
        .errors.last().map(ToString::to_string).unwrap_or_default()
    )]
    MaxRetryExceeded {
        attempts: u32,
        errors: Vec<TaskError>,
    },
}

/// Fallback detection of timeouts from error text.
static TIMEOUT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\btime[sd]?[\s_-]?out\b|\btimeout\b|deadline\s+exceeded|\b(408|504)\b").unwrap()
});

impl TaskError {
    /// Which taxonomy kind this error belongs to
    pub fn kind(&self) -> TaskErrorKind {
        match self {
            TaskError::Aborted { .. } => TaskErrorKind::Aborted,
            TaskError::ConsecutiveMistakeLimitReached { .. } => {
                TaskErrorKind::ConsecutiveMistakeLimitReached
            }
            TaskError::ApiTimeout { .. } => TaskErrorKind::ApiTimeout,
            TaskError::ApiRequestFailed { .. } => TaskErrorKind::ApiRequestFailed,
            TaskError::NoApiResponse => TaskErrorKind::NoApiResponse,
            TaskError::NoToolsUsed => TaskErrorKind::NoToolsUsed,
            TaskError::StreamingFailed { .. } => TaskErrorKind::StreamingFailed,
            TaskError::MaxRetryExceeded { .. } => TaskErrorKind::MaxRetryExceeded,
        }
    }

    /// Check if this error may be retried
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Errors collected before the retry budget ran out
    pub fn collected_errors(&self) -> &[TaskError] {
        match self {
            TaskError::MaxRetryExceeded { errors, .. } => errors,
            _ => &[],
        }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        TaskError::Aborted {
            reason: reason.into(),
        }
    }

    /// Build a timeout error for a request that ran past the session deadline
    pub fn timed_out(timeout: std::time::Duration) -> Self {
        TaskError::ApiTimeout {
            message: format!("no complete response within {:?}", timeout),
            source: None,
        }
    }

    /// Classify a backend failure. Structured signals win over message text.
    pub fn classify(error: spool_ai::Error) -> Self {
        if error.is_aborted() {
            return TaskError::aborted("backend request aborted");
        }

        let message = error.to_string();
        if error.is_timeout() || TIMEOUT_PATTERN.is_match(&message) {
            return TaskError::ApiTimeout {
                message,
                source: Some(error),
            };
        }

        TaskError::ApiRequestFailed {
            message,
            source: Some(error),
        }
    }

    /// Classify an `error` event from the stream.
    ///
    /// Before any content arrived the request itself failed; afterwards the
    /// stream broke mid-flight.
    pub fn from_stream_error(code: Option<String>, message: String, content_seen: bool) -> Self {
        let code_is_timeout = code.as_deref().is_some_and(|c| TIMEOUT_PATTERN.is_match(c));
        if code_is_timeout || (!content_seen && TIMEOUT_PATTERN.is_match(&message)) {
            return TaskError::ApiTimeout {
                message,
                source: None,
            };
        }

        if content_seen {
            TaskError::StreamingFailed { code, message }
        } else {
            let message = match code {
                Some(code) => format!("{} ({})", message, code),
                None => message,
            };
            TaskError::ApiRequestFailed {
                message,
                source: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(TaskErrorKind::ApiTimeout.is_retryable());
        assert!(TaskErrorKind::ApiRequestFailed.is_retryable());
        assert!(TaskErrorKind::NoApiResponse.is_retryable());
        assert!(TaskErrorKind::NoToolsUsed.is_retryable());
        assert!(TaskErrorKind::StreamingFailed.is_retryable());
    }

    #[test]
    fn test_non_retryable_kinds() {
        assert!(!TaskErrorKind::Aborted.is_retryable());
        assert!(!TaskErrorKind::ConsecutiveMistakeLimitReached.is_retryable());
        assert!(!TaskErrorKind::MaxRetryExceeded.is_retryable());
    }

    #[test]
    fn test_no_tools_used_does_not_back_off() {
        assert!(!TaskErrorKind::NoToolsUsed.backs_off());
        assert!(TaskErrorKind::ApiTimeout.backs_off());
        assert!(!TaskErrorKind::Aborted.backs_off());
    }

    #[test]
    fn test_classify_structured_timeout() {
        let err = TaskError::classify(spool_ai::Error::Timeout("60s".into()));
        assert_eq!(err.kind(), TaskErrorKind::ApiTimeout);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_classify_timeout_message_fallback() {
        let err = TaskError::classify(spool_ai::Error::api("server_error", "upstream timed out"));
        assert_eq!(err.kind(), TaskErrorKind::ApiTimeout);

        let err = TaskError::classify(spool_ai::Error::Sse("Connection timeout".into()));
        assert_eq!(err.kind(), TaskErrorKind::ApiTimeout);
    }

    #[test]
    fn test_classify_request_failure() {
        let err = TaskError::classify(spool_ai::Error::api_status(500, "server_error", "boom"));
        assert_eq!(err.kind(), TaskErrorKind::ApiRequestFailed);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_aborted() {
        let err = TaskError::classify(spool_ai::Error::Aborted);
        assert_eq!(err.kind(), TaskErrorKind::Aborted);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_stream_error_before_content_is_request_failure() {
        let err = TaskError::from_stream_error(Some("401".into()), "bad key".into(), false);
        assert_eq!(err.kind(), TaskErrorKind::ApiRequestFailed);
        assert!(err.to_string().contains("bad key (401)"));
    }

    #[test]
    fn test_stream_error_after_content_is_streaming_failure() {
        let err = TaskError::from_stream_error(None, "connection reset".into(), true);
        assert_eq!(err.kind(), TaskErrorKind::StreamingFailed);
    }

    #[test]
    fn test_stream_error_timeout_code() {
        let err = TaskError::from_stream_error(Some("504".into()), "gateway".into(), true);
        assert_eq!(err.kind(), TaskErrorKind::ApiTimeout);
    }

    #[test]
    fn test_max_retry_display_and_errors() {
        let err = TaskError::MaxRetryExceeded {
            attempts: 2,
            errors: vec![TaskError::NoApiResponse, TaskError::NoToolsUsed],
        };
        assert_eq!(err.collected_errors().len(), 2);
        let text = err.to_string();
        assert!(text.contains("after 2 errors"), "got: {}", text);
        assert!(text.contains("without using a tool"), "got: {}", text);
    }

    #[test]
    fn test_timeout_pattern_does_not_match_unrelated_text() {
        assert!(!TIMEOUT_PATTERN.is_match("invalid API key"));
        assert!(!TIMEOUT_PATTERN.is_match("processed 4080 items"));
    }
}
