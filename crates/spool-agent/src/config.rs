//! Session construction parameters

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::ProtocolPreference;
use crate::retry::RetryBackoff;

/// Default name of the tool that ends a session
pub const DEFAULT_COMPLETION_TOOL: &str = "attempt_completion";

/// Configuration for a single session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Unique session id
    pub task_id: String,
    pub system_prompt: String,
    /// Turns without a usable tool call tolerated before the session fails
    pub consecutive_mistake_limit: u32,
    /// Retries of one turn before the session fails
    pub max_retry_attempts: u32,
    /// Deadline for one complete request, stream included
    pub api_request_timeout: Duration,
    /// Tool whose invocation ends the session
    pub completion_tool: String,
    pub tool_protocol: ProtocolPreference,
    pub retry_backoff: RetryBackoff,
    /// Maximum tokens to generate per turn
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            system_prompt: String::new(),
            consecutive_mistake_limit: 3,
            max_retry_attempts: 3,
            api_request_timeout: Duration::from_secs(60),
            completion_tool: DEFAULT_COMPLETION_TOOL.to_string(),
            tool_protocol: ProtocolPreference::Auto,
            retry_backoff: RetryBackoff::default(),
            max_tokens: None,
            temperature: None,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_consecutive_mistake_limit(mut self, limit: u32) -> Self {
        self.consecutive_mistake_limit = limit;
        self
    }

    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    pub fn with_api_request_timeout(mut self, timeout: Duration) -> Self {
        self.api_request_timeout = timeout;
        self
    }

    pub fn with_completion_tool(mut self, name: impl Into<String>) -> Self {
        self.completion_tool = name.into();
        self
    }

    pub fn with_tool_protocol(mut self, preference: ProtocolPreference) -> Self {
        self.tool_protocol = preference;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}
