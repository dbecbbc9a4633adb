//! Tagged markup tool call encoding
//!
//! Backends without structured tool calls write invocations inline:
//!
//! ```text
//! <read_file>
//! <path>src/main.rs</path>
//! </read_file>
//! ```
//!
//! Only tags naming a known tool are calls. Everything else is prose.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use spool_ai::{ToolArguments, ToolCall};

/// Stray fragment some backends leave in generated text
pub const TOOL_CALL_ARTIFACT: &str = "tool_call>";

static OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([A-Za-z_][A-Za-z0-9_\-]*)>").unwrap());

/// Remove `tool_call>` fragments that are not part of a `<tool_call>` or
/// `</tool_call>` tag.
pub fn strip_artifacts(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for (idx, _) in text.match_indices(TOOL_CALL_ARTIFACT) {
        let before = &text[..idx];
        if before.ends_with('<') || before.ends_with("</") {
            continue;
        }
        out.push_str(&text[last..idx]);
        last = idx + TOOL_CALL_ARTIFACT.len();
    }
    out.push_str(&text[last..]);
    out
}

/// Result of scanning one turn's text
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TagExtraction {
    /// The text with every recognized call removed
    pub text: String,
    pub calls: Vec<ToolCall>,
}

/// Extracts tagged tool calls for a fixed set of tool names
#[derive(Debug, Clone, Default)]
pub struct TagExtractor {
    tools: HashSet<String>,
}

impl TagExtractor {
    pub fn new<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tools: tools.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.tools.contains(name)
    }

    /// Scan `text` for tool invocations, in order of appearance.
    ///
    /// An opening tag without its closing tag is not a call.
    pub fn extract(&self, text: &str) -> TagExtraction {
        let mut calls = Vec::new();
        let mut prose = String::with_capacity(text.len());
        let mut cursor = 0;

        while cursor < text.len() {
            let Some(open) = self.next_known_tag(text, cursor) else {
                break;
            };
            let body_start = open.end();
            let name = &text[open.start() + 1..open.end() - 1];
            let closing = format!("</{}>", name);

            let Some(body_len) = text[body_start..].find(&closing) else {
                tracing::debug!(tool = %name, "unclosed tool tag");
                prose.push_str(&text[cursor..body_start]);
                cursor = body_start;
                continue;
            };

            let body = &text[body_start..body_start + body_len];
            prose.push_str(&text[cursor..open.start()]);
            cursor = body_start + body_len + closing.len();

            calls.push(ToolCall::new(
                format!("call_{}", uuid::Uuid::new_v4().simple()),
                name,
                ToolArguments::Parsed(parse_parameters(body)),
            ));
        }
        prose.push_str(&text[cursor..]);

        TagExtraction {
            text: prose.trim().to_string(),
            calls,
        }
    }

    fn next_known_tag<'t>(&self, text: &'t str, mut from: usize) -> Option<regex::Match<'t>> {
        while let Some(caps) = OPEN_TAG.captures_at(text, from) {
            let whole = caps.get(0)?;
            if self.is_known(caps.get(1)?.as_str()) {
                return Some(whole);
            }
            from = whole.end();
        }
        None
    }
}

/// Child tags become string parameters. A repeated parameter keeps its last value.
fn parse_parameters(body: &str) -> Map<String, Value> {
    let mut params = Map::new();
    let mut cursor = 0;

    while let Some(caps) = OPEN_TAG.captures_at(body, cursor) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let closing = format!("</{}>", name.as_str());
        let value_start = whole.end();

        match body[value_start..].find(&closing) {
            Some(len) => {
                let value = trim_line_breaks(&body[value_start..value_start + len]);
                params.insert(name.as_str().to_string(), Value::String(value.to_string()));
                cursor = value_start + len + closing.len();
            }
            None => cursor = value_start,
        }
    }

    params
}

fn trim_line_breaks(value: &str) -> &str {
    let value = value.strip_prefix("\r\n").or_else(|| value.strip_prefix('\n')).unwrap_or(value);
    value
        .strip_suffix("\r\n")
        .or_else(|| value.strip_suffix('\n'))
        .unwrap_or(value)
}
