//! Core types for model backend interactions

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Cost information for a model (per million tokens)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostInfo {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
}

/// What a backend's model can do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    /// Whether the model emits structured (native) tool calls
    pub native_tool_calls: bool,
    /// Whether the model streams reasoning content
    #[serde(default)]
    pub reasoning: bool,
}

/// Model definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier (e.g., "gpt-4.1")
    pub id: String,
    /// Base URL for API calls
    pub base_url: String,
    /// Capability metadata used for protocol selection
    pub capabilities: ModelCapabilities,
    /// Cost per million tokens
    #[serde(default)]
    pub cost: CostInfo,
    /// Context window size in tokens
    pub context_window: u32,
    /// Maximum output tokens
    pub max_tokens: u32,
    /// Additional headers for API calls
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl ModelInfo {
    /// Create a model with conservative defaults and no native tool support
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            capabilities: ModelCapabilities::default(),
            cost: CostInfo::default(),
            context_window: 128_000,
            max_tokens: 8192,
            headers: HashMap::new(),
        }
    }

    pub fn with_native_tool_calls(mut self, supported: bool) -> Self {
        self.capabilities.native_tool_calls = supported;
        self
    }

    pub fn with_cost(mut self, cost: CostInfo) -> Self {
        self.cost = cost;
        self
    }
}

/// Token usage and cost information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    /// Cost in dollars
    pub cost: f64,
}

impl Usage {
    /// Calculate cost for this usage given a model
    pub fn calculate_cost(&self, model: &ModelInfo) -> f64 {
        let per_million = |tokens: u64, price: f64| (tokens as f64 / 1_000_000.0) * price;
        per_million(self.input, model.cost.input)
            + per_million(self.output, model.cost.output)
            + per_million(self.cache_read, model.cost.cache_read)
            + per_million(self.cache_write, model.cost.cache_write)
    }

    /// Add another usage record into this one
    pub fn add(&mut self, other: &Usage) {
        self.input += other.input;
        self.output += other.output;
        self.cache_read += other.cache_read;
        self.cache_write += other.cache_write;
        self.cost += other.cost;
    }

    pub fn total_tokens(&self) -> u64 {
        self.input + self.output + self.cache_read + self.cache_write
    }
}

/// Which wire encoding carries tool calls for a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolProtocol {
    /// Structured, incrementally streamed tool calls
    Native,
    /// Tool calls encoded as markup inside the response text
    Tagged,
}

impl ToolProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolProtocol::Native => "native",
            ToolProtocol::Tagged => "tagged",
        }
    }
}

impl std::fmt::Display for ToolProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments of a tool call.
///
/// Arguments that do not parse as a JSON object are kept verbatim so a
/// malformed call is still represented rather than dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolArguments {
    Parsed(Map<String, Value>),
    Unparsed { raw: String, error: String },
}

impl ToolArguments {
    /// Parse a raw argument string. An empty string is an empty object.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Parsed(Map::new());
        }

        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) => Self::Parsed(map),
            Ok(other) => Self::Unparsed {
                raw: raw.to_string(),
                error: format!("expected a JSON object, got {}", json_type_name(&other)),
            },
            Err(e) => Self::Unparsed {
                raw: raw.to_string(),
                error: e.to_string(),
            },
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }

    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Parsed(map) => Some(map),
            Self::Unparsed { .. } => None,
        }
    }

    /// Look up a single argument
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Convert to a JSON value; unparsed arguments become their raw string
    pub fn to_value(&self) -> Value {
        match self {
            Self::Parsed(map) => Value::Object(map.clone()),
            Self::Unparsed { raw, .. } => Value::String(raw.clone()),
        }
    }

    /// Serialize back to the wire form sent to a backend
    pub fn to_json_string(&self) -> String {
        match self {
            Self::Parsed(map) => Value::Object(map.clone()).to_string(),
            Self::Unparsed { raw, .. } => raw.clone(),
        }
    }
}

impl From<Map<String, Value>> for ToolArguments {
    fn from(map: Map<String, Value>) -> Self {
        Self::Parsed(map)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A complete tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier, unique within one turn
    pub id: String,
    pub name: String,
    pub arguments: ToolArguments,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: ToolArguments) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Whether the arguments failed to parse as a JSON object
    pub fn is_malformed(&self) -> bool {
        !self.arguments.is_parsed()
    }
}

/// Content blocks in messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content
    Text { text: String },
    /// Tool call request from the assistant
    ToolUse(ToolCall),
    /// Result of a tool invocation, fed back as user input
    ToolResult {
        /// Freshly generated identifier for this result
        id: String,
        /// Identifier the model gave the originating call
        tool_use_id: String,
        tool_name: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    /// Create text content
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Get text if this is text content
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Get the tool call if this is a tool use block
    pub fn as_tool_use(&self) -> Option<&ToolCall> {
        match self {
            Self::ToolUse(call) => Some(call),
            _ => None,
        }
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Self::ToolResult { .. })
    }
}

/// Metadata for assistant messages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMetadata {
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Usage,
    /// Reasoning text streamed alongside the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
}

/// Conversation messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// User turn input: text and/or tool results
    User {
        content: Vec<ContentBlock>,
        #[serde(default)]
        timestamp: i64,
    },
    /// Assistant response
    Assistant {
        content: Vec<ContentBlock>,
        #[serde(flatten)]
        metadata: AssistantMetadata,
    },
}

impl Message {
    /// Create a user message with text content
    pub fn user(text: impl Into<String>) -> Self {
        Self::user_with_content(vec![ContentBlock::text(text)])
    }

    /// Create a user message with multiple content blocks
    pub fn user_with_content(content: Vec<ContentBlock>) -> Self {
        Self::User {
            content,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: Vec<ContentBlock>, metadata: AssistantMetadata) -> Self {
        Self::Assistant { content, metadata }
    }

    /// Get the role as a string
    pub fn role(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
        }
    }

    /// Get the content blocks
    pub fn content(&self) -> &[ContentBlock] {
        match self {
            Self::User { content, .. } => content,
            Self::Assistant { content, .. } => content,
        }
    }

    /// Extract all tool calls from an assistant message
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        match self {
            Self::Assistant { content, .. } => {
                content.iter().filter_map(ContentBlock::as_tool_use).collect()
            }
            Self::User { .. } => vec![],
        }
    }

    /// Get combined text content
    pub fn text(&self) -> String {
        self.content()
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Tool definition for native function calling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (used in API calls)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for parameters
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Per-request metadata passed to a backend alongside the history
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    /// Session the request belongs to
    pub task_id: String,
    /// Protocol resolved for this turn
    pub protocol: ToolProtocol,
    /// Tools offered natively; empty under the tagged protocol
    pub tools: Vec<ToolDefinition>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Temperature (0.0 - 2.0)
    pub temperature: Option<f32>,
}

impl RequestMetadata {
    pub fn new(task_id: impl Into<String>, protocol: ToolProtocol) -> Self {
        Self {
            task_id: task_id.into(),
            protocol,
            tools: vec![],
            max_tokens: None,
            temperature: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_object_arguments() {
        let args = ToolArguments::parse(r#"{"path": "src/main.rs", "limit": 10}"#);
        assert!(args.is_parsed());
        assert_eq!(args.get("path"), Some(&json!("src/main.rs")));
        assert_eq!(args.get("limit"), Some(&json!(10)));
    }

    #[test]
    fn test_parse_empty_arguments_is_empty_object() {
        let args = ToolArguments::parse("   ");
        assert_eq!(args, ToolArguments::Parsed(Map::new()));
    }

    #[test]
    fn test_parse_invalid_json_is_unparsed() {
        let args = ToolArguments::parse(r#"{"path": "src/ma"#);
        match args {
            ToolArguments::Unparsed { raw, error } => {
                assert_eq!(raw, r#"{"path": "src/ma"#);
                assert!(!error.is_empty());
            }
            other => panic!("expected unparsed, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_non_object_is_unparsed() {
        let args = ToolArguments::parse("[1, 2, 3]");
        match args {
            ToolArguments::Unparsed { error, .. } => assert!(error.contains("array")),
            other => panic!("expected unparsed, got {:?}", other),
        }
    }

    #[test]
    fn test_unparsed_round_trips_raw_text() {
        let args = ToolArguments::parse("not json");
        assert_eq!(args.to_json_string(), "not json");
        assert_eq!(args.to_value(), json!("not json"));
    }

    #[test]
    fn test_usage_cost_and_add() {
        let model = ModelInfo::new("m", "http://localhost").with_cost(CostInfo {
            input: 3.0,
            output: 15.0,
            cache_read: 0.3,
            cache_write: 3.75,
        });
        let usage = Usage {
            input: 1_000_000,
            output: 100_000,
            ..Default::default()
        };
        let cost = usage.calculate_cost(&model);
        assert!((cost - 4.5).abs() < 1e-9);

        let mut total = Usage::default();
        total.add(&usage);
        total.add(&usage);
        assert_eq!(total.input, 2_000_000);
        assert_eq!(total.output, 200_000);
        assert_eq!(total.total_tokens(), 2_200_000);
    }

    #[test]
    fn test_message_tool_calls_and_text() {
        let msg = Message::assistant(
            vec![
                ContentBlock::text("Reading the file."),
                ContentBlock::ToolUse(ToolCall::new(
                    "call_1",
                    "read_file",
                    ToolArguments::parse(r#"{"path":"a.txt"}"#),
                )),
            ],
            AssistantMetadata::default(),
        );
        assert_eq!(msg.role(), "assistant");
        assert_eq!(msg.text(), "Reading the file.");
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
    }

    #[test]
    fn test_message_serde_shape() {
        let msg = Message::user("hello");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][0]["text"], "hello");

        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back.text(), "hello");
    }
}
