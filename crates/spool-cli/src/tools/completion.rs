//! Completion tool

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use spool_agent::{DEFAULT_COMPLETION_TOOL, Tool, ToolResult};
use tokio_util::sync::CancellationToken;

use super::arg_str;

/// Ends the session with a final result for the user
pub struct AttemptCompletionTool {
    name: String,
}

impl AttemptCompletionTool {
    pub fn new() -> Self {
        Self::named(DEFAULT_COMPLETION_TOOL)
    }

    /// Register under the session's configured completion tool name
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for AttemptCompletionTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for AttemptCompletionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Present the final result of the task. Call this once the task is done; the session ends afterwards."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "result": {
                    "type": "string",
                    "description": "Final result of the task, written for the user"
                }
            },
            "required": ["result"]
        })
    }

    async fn execute(&self, arguments: &Map<String, Value>, _cancel: CancellationToken) -> ToolResult {
        match arg_str(arguments, "result") {
            Some(result) if !result.trim().is_empty() => ToolResult::text(result.trim()),
            _ => ToolResult::error("Missing 'result' argument"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echoes_result() {
        let tool = AttemptCompletionTool::new();
        let args = json!({"result": "\nAll done.\n"});
        let result = tool
            .execute(args.as_object().unwrap(), CancellationToken::new())
            .await;
        assert!(!result.is_error);
        assert_eq!(result.content, "All done.");
    }

    #[tokio::test]
    async fn test_blank_result_is_error() {
        let tool = AttemptCompletionTool::named("done");
        assert_eq!(tool.name(), "done");
        let args = json!({"result": "  "});
        let result = tool
            .execute(args.as_object().unwrap(), CancellationToken::new())
            .await;
        assert!(result.is_error);
    }
}
