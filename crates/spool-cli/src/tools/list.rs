//! Directory listing tool

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use spool_agent::{Tool, ToolResult};
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use super::{arg_bool, arg_str, arg_u64, resolve_path};

const DEFAULT_LIMIT: usize = 200;
const SKIPPED_DIRS: &[&str] = &["node_modules", "target", ".git"];

/// Lists directory entries with sizes
pub struct ListFilesTool {
    cwd: PathBuf,
}

impl ListFilesTool {
    pub fn new(cwd: &Path) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and directories. Directories end with '/'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list, relative to the working directory (defaults to it)"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Whether to list recursively (default: false)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of entries to return (default: 200)"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, arguments: &Map<String, Value>, cancel: CancellationToken) -> ToolResult {
        let path = arg_str(arguments, "path")
            .map(|p| resolve_path(&self.cwd, p))
            .unwrap_or_else(|| self.cwd.clone());
        let recursive = arg_bool(arguments, "recursive").unwrap_or(false);
        let limit = arg_u64(arguments, "limit")
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_LIMIT)
            .max(1);

        if !path.exists() {
            return ToolResult::error(format!("Path does not exist: {}", path.display()));
        }
        if !path.is_dir() {
            return ToolResult::error(format!("Path is not a directory: {}", path.display()));
        }

        let mut entries = Vec::new();
        if let Err(e) = collect(&path, &path, recursive, &cancel, &mut entries, limit) {
            return ToolResult::error(format!("Error reading directory: {}", e));
        }

        if cancel.is_cancelled() {
            return ToolResult::error("List cancelled");
        }
        if entries.is_empty() {
            return ToolResult::text("(empty directory)");
        }

        let truncated = entries.len() >= limit;
        let mut output = entries.join("\n");
        if truncated {
            output.push_str(&format!("\n\n(showing first {} entries)", limit));
        }
        ToolResult::text(output)
    }
}

fn collect(
    base: &Path,
    dir: &Path,
    recursive: bool,
    cancel: &CancellationToken,
    entries: &mut Vec<String>,
    limit: usize,
) -> std::io::Result<()> {
    let mut items: Vec<_> = fs::read_dir(dir)?.flatten().collect();
    items.sort_by_key(|e| e.path());

    for entry in items {
        if cancel.is_cancelled() || entries.len() >= limit {
            break;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }

        let full_path = entry.path();
        let relative = full_path.strip_prefix(base).unwrap_or(&full_path);
        let metadata = entry.metadata().ok();
        entries.push(format_entry(&relative.to_string_lossy(), &full_path, metadata.as_ref()));

        if recursive && full_path.is_dir() && !SKIPPED_DIRS.contains(&name.as_str()) {
            // Unreadable subdirectories are listed but not descended into
            let _ = collect(base, &full_path, recursive, cancel, entries, limit);
        }
    }
    Ok(())
}

fn format_entry(name: &str, path: &Path, metadata: Option<&fs::Metadata>) -> String {
    if path.is_dir() {
        return format!("{}/", name);
    }
    match metadata {
        Some(m) => format!("{}\t{}", name, format_size(m.len())),
        None => name.to_string(),
    }
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1}M", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}K", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}
