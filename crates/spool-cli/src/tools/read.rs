//! File reading tool

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use spool_agent::{Tool, ToolResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::sync::CancellationToken;

use super::{arg_str, arg_u64, resolve_path};

const MAX_LINES: usize = 2000;
const MAX_LINE_CHARS: usize = 2000;

/// Reads a text file, numbering each returned line
pub struct ReadFileTool {
    cwd: PathBuf,
}

impl ReadFileTool {
    pub fn new(cwd: &Path) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file. Lines are prefixed with their line number. For large files, use offset and limit."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the working directory"
                },
                "offset": {
                    "type": "integer",
                    "description": "Line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: &Map<String, Value>, cancel: CancellationToken) -> ToolResult {
        let Some(raw_path) = arg_str(arguments, "path") else {
            return ToolResult::error("Missing 'path' argument");
        };
        let path = resolve_path(&self.cwd, raw_path);

        if cancel.is_cancelled() {
            return ToolResult::error("Operation cancelled");
        }

        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("Failed to read {}: {}", raw_path, e)),
        };

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();
        if total_lines == 0 {
            return ToolResult::text("(empty file)");
        }

        let offset = arg_u64(arguments, "offset")
            .map(|o| (o as usize).saturating_sub(1))
            .unwrap_or(0);
        let limit = arg_u64(arguments, "limit")
            .map(|l| l as usize)
            .unwrap_or(MAX_LINES)
            .min(MAX_LINES);

        if offset >= total_lines {
            return ToolResult::error(format!(
                "Offset {} is beyond end of file ({} lines total)",
                offset + 1,
                total_lines
            ));
        }

        let end = (offset + limit).min(total_lines);
        let mut had_truncated = false;
        let formatted: Vec<String> = lines[offset..end]
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let line = if line.chars().count() > MAX_LINE_CHARS {
                    had_truncated = true;
                    line.chars().take(MAX_LINE_CHARS).collect()
                } else {
                    line.to_string()
                };
                format!("{:>6} | {}", offset + i + 1, line)
            })
            .collect();

        let mut output = formatted.join("\n");

        let mut notices = Vec::new();
        if had_truncated {
            notices.push(format!("Some lines were truncated to {} characters", MAX_LINE_CHARS));
        }
        if end < total_lines {
            notices.push(format!(
                "{} more lines not shown. Use offset={} to continue reading",
                total_lines - end,
                end + 1
            ));
        }
        if !notices.is_empty() {
            output.push_str(&format!("\n\n... ({})", notices.join(". ")));
        }

        ToolResult::text(output)
    }
}
