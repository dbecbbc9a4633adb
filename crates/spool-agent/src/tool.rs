//! Tool trait, registry and the tool-handling seam

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use spool_ai::ToolDefinition;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Result of a tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Content to return to the model
    pub content: String,
    /// Whether the execution resulted in an error
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            is_error: false,
        }
    }

    /// Create an error result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// Failures raised by a tool handler. The dispatcher folds these into
/// error results; they never end a session.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls and tagged markup)
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with parsed arguments
    async fn execute(&self, arguments: &Map<String, Value>, cancel: CancellationToken) -> ToolResult;
}

/// Type alias for a shared tool
pub type BoxedTool = Arc<dyn Tool>;

/// Describe a tool for native function calling
pub fn to_definition(tool: &dyn Tool) -> ToolDefinition {
    ToolDefinition::new(tool.name(), tool.description(), tool.parameters_schema())
}

/// The collaborator that executes tool calls for a session.
///
/// Returning `Ok(None)` means the call produced nothing to report back.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<Option<ToolResult>, ToolError>;

    /// Tools offered to the model.
    ///
    /// Under the tagged protocol these names are also the tags the session
    /// recognizes as calls; a handler that lists nothing is only reachable
    /// through the completion tool there.
    fn definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }

    /// Names recognized in tagged markup
    fn tool_names(&self) -> Vec<String> {
        self.definitions().into_iter().map(|d| d.name).collect()
    }
}

/// A name-indexed set of tools
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<BoxedTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any existing tool with the same name
    pub fn register(&mut self, tool: BoxedTool) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn with(mut self, tool: BoxedTool) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&BoxedTool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoxedTool> {
        self.tools.iter()
    }
}

#[async_trait]
impl ToolHandler for ToolRegistry {
    async fn handle(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<Option<ToolResult>, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        Ok(Some(tool.execute(arguments, cancel).await))
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| to_definition(t.as_ref())).collect()
    }
}
