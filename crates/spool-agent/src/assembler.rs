//! Folds one turn's stream events into an assistant message

use spool_ai::{ContentBlock, ModelInfo, StreamEvent, ToolCall, ToolProtocol, Usage};

use crate::error::{Result, TaskError};
use crate::reassembler::ToolCallReassembler;
use crate::tags::{TagExtractor, strip_artifacts};
use crate::usage::UsageAccumulator;

/// The structured result of one turn
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledTurn {
    /// Tool use blocks in stream order, then a trailing text block if any text remains
    pub content: Vec<ContentBlock>,
    /// Reasoning streamed alongside the response, if any
    pub reasoning: Option<String>,
    /// All streamed text, unmodified
    pub raw_text: String,
    pub protocol: ToolProtocol,
    pub usage: Usage,
}

impl AssembledTurn {
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.content.iter().filter_map(ContentBlock::as_tool_use).collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content.iter().any(|block| block.as_tool_use().is_some())
    }

    pub fn text(&self) -> Option<&str> {
        self.content.iter().find_map(ContentBlock::as_text)
    }
}

/// Consumes stream events one at a time.
///
/// Owned by a session for its whole lifetime and reset by
/// [`begin`](Self::begin) at the start of every turn, so no buffer survives
/// from one turn into the next.
#[derive(Debug)]
pub struct ResponseAssembler {
    protocol: ToolProtocol,
    reassembler: ToolCallReassembler,
    usage: UsageAccumulator,
    pricing: Option<ModelInfo>,
    text: String,
    reasoning: String,
    content_seen: bool,
}

impl Default for ResponseAssembler {
    fn default() -> Self {
        Self::new(ToolProtocol::Native)
    }
}

impl ResponseAssembler {
    pub fn new(protocol: ToolProtocol) -> Self {
        Self {
            protocol,
            reassembler: ToolCallReassembler::new(),
            usage: UsageAccumulator::new(),
            pricing: None,
            text: String::new(),
            reasoning: String::new(),
            content_seen: false,
        }
    }

    /// Price usage reports that arrive without a cost
    pub fn with_pricing(mut self, model: ModelInfo) -> Self {
        self.usage = UsageAccumulator::with_pricing(model.clone());
        self.pricing = Some(model);
        self
    }

    /// Reset all buffers for a new turn under `protocol`
    pub fn begin(&mut self, protocol: ToolProtocol) {
        self.protocol = protocol;
        self.reassembler.reset();
        self.usage = match &self.pricing {
            Some(model) => UsageAccumulator::with_pricing(model.clone()),
            None => UsageAccumulator::new(),
        };
        self.text.clear();
        self.reasoning.clear();
        self.content_seen = false;
    }

    pub fn protocol(&self) -> ToolProtocol {
        self.protocol
    }

    /// Usage recorded so far this turn, including turns that later fail
    pub fn usage(&self) -> &UsageAccumulator {
        &self.usage
    }

    /// Whether any model output has arrived this turn
    pub fn content_seen(&self) -> bool {
        self.content_seen
    }

    /// Process one event. An `error` event fails the turn.
    pub fn push(&mut self, event: StreamEvent) -> Result<()> {
        match event {
            StreamEvent::Text { content } => {
                if !content.is_empty() {
                    self.content_seen = true;
                }
                self.text.push_str(&content);
            }
            StreamEvent::Reasoning { content } => {
                self.content_seen = true;
                self.reasoning.push_str(&content);
            }
            StreamEvent::ToolCall {
                id,
                name,
                arguments,
            } => {
                self.content_seen = true;
                if self.protocol == ToolProtocol::Native {
                    self.reassembler.push_complete(&id, &name, &arguments);
                } else {
                    tracing::debug!(tool = %name, "ignoring native tool call under tagged protocol");
                }
            }
            StreamEvent::ToolCallPartial {
                index,
                id,
                name,
                arguments_delta,
            } => {
                self.content_seen = true;
                if self.protocol == ToolProtocol::Native {
                    self.reassembler.push_partial(
                        index,
                        id.as_deref(),
                        name.as_deref(),
                        &arguments_delta,
                    );
                }
            }
            StreamEvent::ToolCallEnd { index } => {
                if self.protocol == ToolProtocol::Native {
                    self.reassembler.close(index);
                }
            }
            usage @ StreamEvent::Usage { .. } => {
                self.usage.record_event(&usage);
            }
            StreamEvent::Error { code, message } => {
                return Err(TaskError::from_stream_error(code, message, self.content_seen));
            }
        }
        Ok(())
    }

    /// Close the turn and build the assistant content.
    ///
    /// Fails with [`TaskError::NoApiResponse`] when the turn produced neither
    /// text nor tool calls.
    pub fn finish(&mut self, extractor: &TagExtractor) -> Result<AssembledTurn> {
        let (text, calls) = match self.protocol {
            ToolProtocol::Native => (self.text.trim().to_string(), self.reassembler.finalize()),
            ToolProtocol::Tagged => {
                let cleaned = strip_artifacts(&self.text);
                let calls = extractor.extract(&cleaned).calls;
                (cleaned.trim().to_string(), calls)
            }
        };

        if text.is_empty() && calls.is_empty() {
            return Err(TaskError::NoApiResponse);
        }

        tracing::debug!(
            protocol = %self.protocol,
            text_len = self.text.len(),
            tool_calls = calls.len(),
            "turn assembled"
        );

        let mut content: Vec<ContentBlock> = calls.into_iter().map(ContentBlock::ToolUse).collect();
        if !text.is_empty() {
            content.push(ContentBlock::text(text));
        }
        Ok(AssembledTurn {
            content,
            reasoning: (!self.reasoning.is_empty()).then(|| self.reasoning.clone()),
            raw_text: self.text.clone(),
            protocol: self.protocol,
            usage: self.usage.totals().clone(),
        })
    }
}

/// Assemble a complete, already collected event sequence
pub fn assemble(
    events: impl IntoIterator<Item = StreamEvent>,
    protocol: ToolProtocol,
    extractor: &TagExtractor,
) -> Result<AssembledTurn> {
    let mut assembler = ResponseAssembler::new(protocol);
    for event in events {
        assembler.push(event)?;
    }
    assembler.finish(extractor)
}
