//! OpenAI-compatible Chat Completions backend

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use super::ModelBackend;
use crate::{
    error::{Error, Result},
    stream::{StreamEvent, StreamEventStream},
    types::{ContentBlock, Message, ModelInfo, RequestMetadata, ToolProtocol},
};

/// Backend for any server speaking the OpenAI chat completions protocol
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    model: ModelInfo,
}

impl OpenAiBackend {
    /// Create a new backend for a model with an API key
    pub fn new(api_key: impl Into<String>, model: ModelInfo) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model,
        }
    }

    /// Create from the `OPENAI_API_KEY` environment variable
    pub fn from_env(model: ModelInfo) -> Result<Self> {
        let api_key = super::get_api_key(None, "OPENAI_API_KEY")?;
        Ok(Self::new(api_key, model))
    }

    fn build_headers(&self) -> Result<reqwest::header::HeaderMap> {
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", self.api_key)
            .parse()
            .map_err(|_| Error::InvalidApiKey)?;
        headers.insert(reqwest::header::AUTHORIZATION, auth);
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        // Add model-specific headers
        for (key, value) in &self.model.headers {
            if let (Ok(name), Ok(val)) = (
                key.parse::<reqwest::header::HeaderName>(),
                value.parse::<reqwest::header::HeaderValue>(),
            ) {
                headers.insert(name, val);
            }
        }
        Ok(headers)
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    fn model(&self) -> ModelInfo {
        self.model.clone()
    }

    async fn create_stream(
        &self,
        system_prompt: &str,
        history: &[Message],
        metadata: &RequestMetadata,
    ) -> Result<StreamEventStream> {
        let request = build_request(&self.model, system_prompt, history, metadata);
        let url = format!("{}/chat/completions", self.model.base_url.trim_end_matches('/'));
        tracing::debug!(
            model = %self.model.id,
            protocol = %metadata.protocol,
            messages = request.messages.len(),
            "opening chat completions stream"
        );

        let request_builder = self
            .client
            .post(&url)
            .headers(self.build_headers()?)
            .json(&request);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source)))
    }
}

fn build_request(
    model: &ModelInfo,
    system_prompt: &str,
    history: &[Message],
    metadata: &RequestMetadata,
) -> ChatRequest {
    let mut messages = vec![ChatMessage::text("system", system_prompt)];
    for msg in history {
        messages.extend(convert_message(msg, metadata.protocol));
    }

    let tools: Option<Vec<ChatTool>> = match metadata.protocol {
        ToolProtocol::Native if !metadata.tools.is_empty() => Some(
            metadata
                .tools
                .iter()
                .map(|t| ChatTool {
                    tool_type: "function".to_string(),
                    function: ChatFunction {
                        name: t.name.clone(),
                        description: Some(t.description.clone()),
                        parameters: Some(t.parameters.clone()),
                    },
                })
                .collect(),
        ),
        _ => None,
    };

    let has_tools = tools.is_some();
    ChatRequest {
        model: model.id.clone(),
        messages,
        stream: true,
        stream_options: StreamOptions { include_usage: true },
        max_tokens: metadata.max_tokens.or(Some(model.max_tokens)),
        temperature: metadata.temperature,
        tools,
        tool_choice: has_tools.then(|| serde_json::json!("auto")),
    }
}

fn convert_message(msg: &Message, protocol: ToolProtocol) -> Vec<ChatMessage> {
    match msg {
        Message::User { content, .. } => {
            let mut out = Vec::new();
            let mut text_parts = Vec::new();

            for block in content {
                match block {
                    ContentBlock::Text { text } => text_parts.push(text.clone()),
                    ContentBlock::ToolResult {
                        tool_use_id,
                        tool_name,
                        content,
                        ..
                    } => match protocol {
                        // Tool messages must directly follow the assistant's calls
                        ToolProtocol::Native => out.push(ChatMessage {
                            role: "tool".to_string(),
                            content: Some(content.clone()),
                            tool_calls: None,
                            tool_call_id: Some(tool_use_id.clone()),
                        }),
                        ToolProtocol::Tagged => {
                            text_parts.push(format!("[{}] Result:\n{}", tool_name, content))
                        }
                    },
                    ContentBlock::ToolUse(_) => {}
                }
            }

            if !text_parts.is_empty() {
                out.push(ChatMessage::text("user", text_parts.join("\n\n")));
            }
            out
        }
        Message::Assistant { content, .. } => {
            let mut text_parts = Vec::new();
            let mut tool_calls = Vec::new();

            for block in content {
                match block {
                    ContentBlock::Text { text } => text_parts.push(text.clone()),
                    ContentBlock::ToolUse(call) if protocol == ToolProtocol::Native => {
                        tool_calls.push(ChatToolCall {
                            id: call.id.clone(),
                            call_type: "function".to_string(),
                            function: ChatFunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.to_json_string(),
                            },
                        });
                    }
                    // Tagged calls already live in the text
                    ContentBlock::ToolUse(_) | ContentBlock::ToolResult { .. } => {}
                }
            }

            vec![ChatMessage {
                role: "assistant".to_string(),
                content: (!text_parts.is_empty()).then(|| text_parts.join("")),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            }]
        }
    }
}

fn create_stream(mut event_source: EventSource) -> impl futures::Stream<Item = StreamEvent> {
    stream! {
        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    match serde_json::from_str::<StreamChunk>(&msg.data) {
                        Ok(chunk) => {
                            let events = chunk_events(chunk);
                            let failed = events.iter().any(StreamEvent::is_error);
                            for event in events {
                                yield event;
                            }
                            if failed {
                                break;
                            }
                        }
                        Err(e) => {
                            yield StreamEvent::error(
                                Some("invalid_chunk"),
                                format!("Failed to parse chunk: {}", e),
                            );
                            break;
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    let body = response.text().await.unwrap_or_default();
                    yield StreamEvent::error(Some(status.as_str()), body);
                    break;
                }
                Err(e) => {
                    yield StreamEvent::error(Some("sse"), format!("SSE error: {}", e));
                    break;
                }
            }
        }
        event_source.close();
    }
}

/// Map one decoded chunk to the raw events it carries
fn chunk_events(chunk: StreamChunk) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    if let Some(error) = chunk.error {
        events.push(StreamEvent::Error {
            code: error.code.map(|c| match c {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
            message: error.message,
        });
        return events;
    }

    for choice in chunk.choices {
        if let Some(reasoning) = choice.delta.reasoning_content.filter(|r| !r.is_empty()) {
            events.push(StreamEvent::Reasoning { content: reasoning });
        }
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            events.push(StreamEvent::Text { content });
        }
        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match tc.function {
                Some(f) => (f.name, f.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            events.push(StreamEvent::ToolCallPartial {
                index: tc.index,
                id: tc.id,
                name,
                arguments_delta: arguments,
            });
        }
    }

    if let Some(usage) = chunk.usage {
        events.push(StreamEvent::Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cache_write_tokens: None,
            cache_read_tokens: usage.prompt_tokens_details.and_then(|d| d.cached_tokens),
            total_cost: usage.cost,
        });
    }

    events
}

// Request types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: ChatFunction,
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: ChatFunctionCall,
}

#[derive(Debug, Serialize)]
struct ChatFunctionCall {
    name: String,
    arguments: String,
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: u32,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
    /// Reported by some OpenAI-compatible routers
    #[serde(default)]
    cost: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    cached_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssistantMetadata, ToolArguments, ToolCall, ToolDefinition};

    fn parse_chunk(json: &str) -> Vec<StreamEvent> {
        chunk_events(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_chunk_text_and_reasoning() {
        let events = parse_chunk(
            r#"{"choices":[{"delta":{"reasoning_content":"think","content":"Hello"}}]}"#,
        );
        assert_eq!(
            events,
            vec![StreamEvent::reasoning("think"), StreamEvent::text("Hello")]
        );
    }

    #[test]
    fn test_chunk_tool_call_fragments() {
        let first = parse_chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"read_file","arguments":""}}]}}]}"#,
        );
        assert_eq!(first, vec![StreamEvent::tool_call_start(0, "call_1", "read_file")]);

        let next = parse_chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"path\":"}}]}}]}"#,
        );
        assert_eq!(next, vec![StreamEvent::tool_call_delta(0, "{\"path\":")]);
    }

    #[test]
    fn test_chunk_usage_with_cache() {
        let events = parse_chunk(
            r#"{"choices":[],"usage":{"prompt_tokens":100,"completion_tokens":20,"prompt_tokens_details":{"cached_tokens":40}}}"#,
        );
        assert_eq!(
            events,
            vec![StreamEvent::Usage {
                input_tokens: 100,
                output_tokens: 20,
                cache_write_tokens: None,
                cache_read_tokens: Some(40),
                total_cost: None,
            }]
        );
    }

    #[test]
    fn test_chunk_error_payload() {
        let events = parse_chunk(r#"{"error":{"message":"overloaded","code":529}}"#);
        assert_eq!(events, vec![StreamEvent::error(Some("529"), "overloaded")]);
    }

    fn sample_history() -> Vec<Message> {
        vec![
            Message::user("list the files"),
            Message::assistant(
                vec![
                    ContentBlock::text("Listing."),
                    ContentBlock::ToolUse(ToolCall::new(
                        "call_1",
                        "list_files",
                        ToolArguments::parse(r#"{"path":"."}"#),
                    )),
                ],
                AssistantMetadata::default(),
            ),
            Message::user_with_content(vec![ContentBlock::ToolResult {
                id: "res_1".into(),
                tool_use_id: "call_1".into(),
                tool_name: "list_files".into(),
                content: "a.txt".into(),
                is_error: false,
            }]),
        ]
    }

    #[test]
    fn test_native_request_uses_tool_messages() {
        let model = ModelInfo::new("gpt-test", "http://localhost").with_native_tool_calls(true);
        let mut metadata = RequestMetadata::new("task", ToolProtocol::Native);
        metadata.tools = vec![ToolDefinition::new(
            "list_files",
            "List files",
            serde_json::json!({"type": "object"}),
        )];

        let request = build_request(&model, "sys", &sample_history(), &metadata);
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][2]["tool_calls"][0]["id"], "call_1");
        assert_eq!(
            value["messages"][2]["tool_calls"][0]["function"]["arguments"],
            r#"{"path":"."}"#
        );
        assert_eq!(value["messages"][3]["role"], "tool");
        assert_eq!(value["messages"][3]["tool_call_id"], "call_1");
        assert_eq!(value["tools"][0]["function"]["name"], "list_files");
        assert_eq!(value["tool_choice"], "auto");
    }

    #[test]
    fn test_tagged_request_renders_results_as_text() {
        let model = ModelInfo::new("local", "http://localhost");
        let metadata = RequestMetadata::new("task", ToolProtocol::Tagged);

        let request = build_request(&model, "sys", &sample_history(), &metadata);
        let value = serde_json::to_value(&request).unwrap();

        assert!(value.get("tools").is_none());
        assert!(value["messages"][2].get("tool_calls").is_none());
        assert_eq!(value["messages"][3]["role"], "user");
        assert_eq!(value["messages"][3]["content"], "[list_files] Result:\na.txt");
    }
}
