//! Built-in tools for spool sessions

mod completion;
mod list;
mod read;
mod write;

pub use completion::AttemptCompletionTool;
pub use list::ListFilesTool;
pub use read::ReadFileTool;
pub use write::WriteToFileTool;

use serde_json::{Map, Value};
use spool_agent::ToolRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Registry holding every built-in tool, rooted at `cwd`
pub fn builtin_registry(cwd: &Path, completion_tool: &str) -> ToolRegistry {
    ToolRegistry::new()
        .with(Arc::new(ReadFileTool::new(cwd)))
        .with(Arc::new(WriteToFileTool::new(cwd)))
        .with(Arc::new(ListFilesTool::new(cwd)))
        .with(Arc::new(AttemptCompletionTool::named(completion_tool)))
}

/// Resolve a path argument: `~` expands to the home directory, relative
/// paths are joined onto `cwd`.
pub(crate) fn resolve_path(cwd: &Path, raw: &str) -> PathBuf {
    if let Some(stripped) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if raw == "~" {
        return dirs::home_dir().unwrap_or_else(|| cwd.to_path_buf());
    }

    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}

// Tagged markup delivers every parameter as a string, so numeric and
// boolean arguments accept their textual form too.

pub(crate) fn arg_str<'a>(arguments: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(Value::as_str)
}

pub(crate) fn arg_u64(arguments: &Map<String, Value>, key: &str) -> Option<u64> {
    match arguments.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn arg_bool(arguments: &Map<String, Value>, key: &str) -> Option<bool> {
    match arguments.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
pub(crate) fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("spool-test-{}", uuid::Uuid::new_v4().simple()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
