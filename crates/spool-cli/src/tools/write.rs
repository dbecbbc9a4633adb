//! File writing tool

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use spool_agent::{Tool, ToolResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::sync::CancellationToken;

use super::{arg_str, resolve_path};

/// Writes a whole file, creating parent directories as needed
pub struct WriteToFileTool {
    cwd: PathBuf,
}

impl WriteToFileTool {
    pub fn new(cwd: &Path) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for WriteToFileTool {
    fn name(&self) -> &str {
        "write_to_file"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file if it doesn't exist, overwrites it if it does. Parent directories are created automatically."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the working directory"
                },
                "content": {
                    "type": "string",
                    "description": "Complete content to write to the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, arguments: &Map<String, Value>, cancel: CancellationToken) -> ToolResult {
        let Some(raw_path) = arg_str(arguments, "path") else {
            return ToolResult::error("Missing 'path' argument");
        };
        let Some(content) = arg_str(arguments, "content") else {
            return ToolResult::error("Missing 'content' argument");
        };
        if raw_path == "~" {
            return ToolResult::error("Cannot write to home directory itself");
        }
        let path = resolve_path(&self.cwd, raw_path);

        if cancel.is_cancelled() {
            return ToolResult::error("Operation cancelled");
        }

        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                return ToolResult::error(format!("Failed to create directory: {}", e));
            }
        }

        match fs::write(&path, content).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), bytes = content.len(), "wrote file");
                ToolResult::text(format!(
                    "Successfully wrote {} bytes to {}",
                    content.len(),
                    raw_path
                ))
            }
            Err(e) => ToolResult::error(format!("Failed to write {}: {}", raw_path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::scratch_dir;

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let dir = scratch_dir();
        let tool = WriteToFileTool::new(&dir);
        let args = json!({"path": "nested/deeper/out.txt", "content": "你好"});

        let result = tool
            .execute(args.as_object().unwrap(), CancellationToken::new())
            .await;
        assert!(!result.is_error, "{}", result.content);
        assert_eq!(
            std::fs::read_to_string(dir.join("nested/deeper/out.txt")).unwrap(),
            "你好"
        );
        assert!(result.content.contains("6 bytes"));
    }

    #[tokio::test]
    async fn test_cancelled_before_write() {
        let dir = scratch_dir();
        let tool = WriteToFileTool::new(&dir);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let args = json!({"path": "out.txt", "content": "x"});
        let result = tool.execute(args.as_object().unwrap(), cancel).await;
        assert!(result.is_error);
        assert!(!dir.join("out.txt").exists());
    }

    #[tokio::test]
    async fn test_missing_content() {
        let tool = WriteToFileTool::new(Path::new("."));
        let args = json!({"path": "out.txt"});
        let result = tool
            .execute(args.as_object().unwrap(), CancellationToken::new())
            .await;
        assert!(result.is_error);
        assert_eq!(result.content, "Missing 'content' argument");
    }
}
