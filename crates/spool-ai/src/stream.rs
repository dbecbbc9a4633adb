//! Raw streaming events emitted by model backends

use crate::types::Usage;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted by a backend while a response streams in.
///
/// Each event is consumed exactly once by the session's response assembler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Response text delta
    Text { content: String },
    /// Reasoning/thinking text delta
    Reasoning { content: String },
    /// A tool call delivered in one piece; `arguments` is raw JSON text
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    /// One fragment of an incrementally streamed tool call
    ToolCallPartial {
        index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        arguments_delta: String,
    },
    /// Explicit close of the partial tool call at `index`
    ToolCallEnd { index: u32 },
    /// Token usage report
    Usage {
        input_tokens: u64,
        output_tokens: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_write_tokens: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_read_tokens: Option<u64>,
        /// Cost in dollars, when the backend reports it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_cost: Option<f64>,
    },
    /// Backend-reported failure
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        message: String,
    },
}

impl StreamEvent {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn reasoning(content: impl Into<String>) -> Self {
        Self::Reasoning {
            content: content.into(),
        }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// A partial tool call fragment carrying only an arguments delta
    pub fn tool_call_delta(index: u32, arguments_delta: impl Into<String>) -> Self {
        Self::ToolCallPartial {
            index,
            id: None,
            name: None,
            arguments_delta: arguments_delta.into(),
        }
    }

    /// The opening fragment of a partial tool call
    pub fn tool_call_start(index: u32, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ToolCallPartial {
            index,
            id: Some(id.into()),
            name: Some(name.into()),
            arguments_delta: String::new(),
        }
    }

    pub fn usage(input_tokens: u64, output_tokens: u64) -> Self {
        Self::Usage {
            input_tokens,
            output_tokens,
            cache_write_tokens: None,
            cache_read_tokens: None,
            total_cost: None,
        }
    }

    pub fn error(code: Option<&str>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    /// Check if this is an error event
    pub fn is_error(&self) -> bool {
        matches!(self, StreamEvent::Error { .. })
    }

    /// Convert a usage event into a `Usage` record
    pub fn as_usage(&self) -> Option<Usage> {
        match self {
            StreamEvent::Usage {
                input_tokens,
                output_tokens,
                cache_write_tokens,
                cache_read_tokens,
                total_cost,
            } => Some(Usage {
                input: *input_tokens,
                output: *output_tokens,
                cache_read: cache_read_tokens.unwrap_or(0),
                cache_write: cache_write_tokens.unwrap_or(0),
                cost: total_cost.unwrap_or(0.0),
            }),
            _ => None,
        }
    }
}

/// A stream of backend events
pub type StreamEventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;
