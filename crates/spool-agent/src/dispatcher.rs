//! Executes a turn's tool calls and folds the results into the next input

use std::collections::HashMap;
use std::sync::Arc;

use spool_ai::{ContentBlock, ToolArguments, ToolCall};

use crate::handle::SessionHandle;
use crate::tool::ToolHandler;

/// Consecutive failures per tool name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolMistakes {
    counts: HashMap<String, u32>,
}

impl ToolMistakes {
    pub fn get(&self, tool: &str) -> u32 {
        self.counts.get(tool).copied().unwrap_or(0)
    }

    pub(crate) fn record_failure(&mut self, tool: &str) -> u32 {
        let count = self.counts.entry(tool.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub(crate) fn record_success(&mut self, tool: &str) {
        self.counts.remove(tool);
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }
}

/// What happened while dispatching one turn's calls
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchOutcome {
    /// `tool_result` blocks for the next turn input
    pub results: Vec<ContentBlock>,
    /// Number of calls handed to the handler
    pub executed: usize,
    /// The completion tool ran
    pub completion_attempted: bool,
    /// Abort was observed before every call ran
    pub aborted: bool,
}

/// Runs tool calls one at a time, in order
pub struct ToolDispatcher {
    handler: Arc<dyn ToolHandler>,
    completion_tool: String,
}

impl ToolDispatcher {
    pub fn new(handler: Arc<dyn ToolHandler>, completion_tool: impl Into<String>) -> Self {
        Self {
            handler,
            completion_tool: completion_tool.into(),
        }
    }

    pub fn handler(&self) -> &Arc<dyn ToolHandler> {
        &self.handler
    }

    pub fn completion_tool(&self) -> &str {
        &self.completion_tool
    }

    /// Execute `calls` in order.
    ///
    /// Abort is checked before and after every call. Malformed calls never
    /// reach the handler. Handler failures become error results.
    pub async fn dispatch(
        &self,
        calls: &[&ToolCall],
        handle: &SessionHandle,
        mistakes: &mut ToolMistakes,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        for (idx, call) in calls.iter().enumerate() {
            if handle.is_aborted() {
                tracing::info!(remaining = calls.len() - idx, "abort observed, skipping tool calls");
                outcome.aborted = true;
                break;
            }

            let arguments = match &call.arguments {
                ToolArguments::Parsed(map) => map,
                ToolArguments::Unparsed { error, .. } => {
                    let failures = mistakes.record_failure(&call.name);
                    tracing::warn!(tool = %call.name, failures, "skipping tool call with malformed arguments");
                    outcome.results.push(tool_result(
                        call,
                        format!(
                            "Invalid arguments for tool '{}': {}. Arguments must be a JSON object.",
                            call.name, error
                        ),
                        true,
                    ));
                    continue;
                }
            };

            tracing::debug!(tool = %call.name, id = %call.id, "executing tool");
            let result = self
                .handler
                .handle(&call.name, arguments, handle.cancel_token())
                .await;
            outcome.executed += 1;

            match result {
                Ok(Some(result)) => {
                    if result.is_error {
                        mistakes.record_failure(&call.name);
                    } else {
                        mistakes.record_success(&call.name);
                    }
                    outcome
                        .results
                        .push(tool_result(call, result.content, result.is_error));
                }
                Ok(None) => mistakes.record_success(&call.name),
                Err(e) => {
                    let failures = mistakes.record_failure(&call.name);
                    tracing::debug!(tool = %call.name, failures, "tool failed: {}", e);
                    outcome.results.push(tool_result(call, e.to_string(), true));
                }
            }

            if call.name == self.completion_tool {
                if idx + 1 < calls.len() {
                    tracing::debug!(skipped = calls.len() - idx - 1, "calls after completion ignored");
                }
                outcome.completion_attempted = true;
                break;
            }

            if handle.is_aborted() {
                tracing::info!(remaining = calls.len() - idx - 1, "abort observed after tool call");
                outcome.aborted = true;
                break;
            }
        }

        outcome
    }
}

fn tool_result(call: &ToolCall, content: String, is_error: bool) -> ContentBlock {
    ContentBlock::ToolResult {
        id: uuid::Uuid::new_v4().to_string(),
        tool_use_id: call.id.clone(),
        tool_name: call.name.clone(),
        content,
        is_error,
    }
}
