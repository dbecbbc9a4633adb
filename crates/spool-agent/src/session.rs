//! The session loop
//!
//! A session drives turns until the model attempts completion, the session
//! is aborted, or a fatal error ends it. Turns are frames on an explicit
//! stack so retry bookkeeping and abort checks work the same at any depth.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use spool_ai::{
    AssistantMetadata, ContentBlock, Message, ModelBackend, RequestMetadata, ToolProtocol, Usage,
};
use std::sync::Arc;

use crate::assembler::ResponseAssembler;
use crate::config::SessionConfig;
use crate::dispatcher::{ToolDispatcher, ToolMistakes};
use crate::error::{Result, TaskError, TaskErrorKind};
use crate::handle::SessionHandle;
use crate::observer::{ObserverBus, TaskAborted, TaskCompleted};
use crate::protocol::select_protocol;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::tags::TagExtractor;
use crate::tool::ToolHandler;
use crate::usage::UsageAccumulator;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Aborted,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input sent in place of the user's when a turn used no tool
pub fn no_tools_used_notice(completion_tool: &str) -> String {
    format!(
        "[ERROR] You did not use a tool in your previous response! Please retry with a tool use.\n\n\
         # Next Steps\n\n\
         If you have completed the task, use the {} tool. \
         Otherwise, proceed with the next step of the task using one of the available tools.",
        completion_tool
    )
}

/// One pending turn
#[derive(Debug)]
struct Frame {
    input: Vec<ContentBlock>,
    retry_attempt: u32,
}

impl Frame {
    fn new(input: Vec<ContentBlock>) -> Self {
        Self {
            input,
            retry_attempt: 0,
        }
    }
}

/// How a turn that did not fail ended
#[derive(Debug)]
enum TurnOutcome {
    /// Tools ran; `next` carries their results when there are any
    Continue { next: Option<Vec<ContentBlock>> },
    /// The completion tool ran
    Completed,
    Aborted,
    /// No tool calls; `notice` replaces the turn input on retry
    NoToolsUsed { notice: Vec<ContentBlock> },
}

/// A single conversation with a model backend
pub struct Session {
    config: SessionConfig,
    backend: Arc<dyn ModelBackend>,
    dispatcher: ToolDispatcher,
    assembler: ResponseAssembler,
    retry: RetryPolicy,
    history: Vec<Message>,
    status: SessionStatus,
    consecutive_mistakes: u32,
    tool_mistakes: ToolMistakes,
    usage: UsageAccumulator,
    /// Errors collected during the current top-level run
    errors: Vec<TaskError>,
    completion_attempted: bool,
    handle: SessionHandle,
    observers: ObserverBus,
}

impl Session {
    /// Create a fresh session
    pub fn new(
        config: SessionConfig,
        backend: Arc<dyn ModelBackend>,
        tools: Arc<dyn ToolHandler>,
    ) -> Self {
        Self::restore(config, backend, tools, Vec::new())
    }

    /// Rebuild an idle session around previously persisted history
    pub fn restore(
        config: SessionConfig,
        backend: Arc<dyn ModelBackend>,
        tools: Arc<dyn ToolHandler>,
        history: Vec<Message>,
    ) -> Self {
        let model = backend.model();
        Self {
            dispatcher: ToolDispatcher::new(tools, config.completion_tool.clone()),
            assembler: ResponseAssembler::new(ToolProtocol::Native).with_pricing(model),
            retry: RetryPolicy::new(config.max_retry_attempts, config.retry_backoff.clone()),
            config,
            backend,
            history,
            status: SessionStatus::Idle,
            consecutive_mistakes: 0,
            tool_mistakes: ToolMistakes::default(),
            usage: UsageAccumulator::new(),
            errors: Vec::new(),
            completion_attempted: false,
            handle: SessionHandle::new(),
            observers: ObserverBus::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.task_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Token and cost totals, failed attempts included
    pub fn usage(&self) -> &Usage {
        self.usage.totals()
    }

    /// Zero the usage totals
    pub fn reset_usage(&mut self) {
        self.usage.reset();
    }

    pub fn consecutive_mistakes(&self) -> u32 {
        self.consecutive_mistakes
    }

    pub fn tool_mistakes(&self) -> &ToolMistakes {
        &self.tool_mistakes
    }

    pub fn completion_attempted(&self) -> bool {
        self.completion_attempted
    }

    pub fn abort_reason(&self) -> Option<String> {
        self.handle.abort_reason()
    }

    /// Get a handle to abort the session from another task
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn observers(&self) -> &ObserverBus {
        &self.observers
    }

    /// Abort the session. Honored at the next checkpoint.
    pub fn abort(&self, reason: impl Into<String>) {
        self.handle.abort_with(reason);
    }

    /// Start the session on a task description
    pub async fn start(&mut self, task: &str) -> Result<bool> {
        self.run(vec![ContentBlock::text(format!("<task>\n{}\n</task>", task))])
            .await
    }

    /// Drive turns starting from `input`.
    ///
    /// Returns `Ok(true)` when the turn sequence completed and `Ok(false)`
    /// when the session was aborted.
    pub async fn run(&mut self, input: Vec<ContentBlock>) -> Result<bool> {
        match self.status {
            SessionStatus::Aborted => return Ok(false),
            SessionStatus::Completed => {
                tracing::warn!(task_id = %self.config.task_id, "session already completed; restore it to continue");
                return Ok(true);
            }
            SessionStatus::Idle | SessionStatus::Running => {}
        }

        self.errors.clear();
        self.completion_attempted = false;
        self.handle.set_running(true);
        self.set_status(SessionStatus::Running);

        let result = self.drive(input).await;
        self.handle.set_running(false);

        match &result {
            Ok(true) => {
                self.set_status(SessionStatus::Completed);
                self.observers.task_completed(TaskCompleted {
                    task_id: self.config.task_id.clone(),
                    usage: self.usage.totals().clone(),
                });
            }
            Ok(false) => self.mark_aborted(),
            Err(error) => {
                tracing::debug!(kind = %error.kind(), "session failed: {}", error);
                self.handle.abort_with(error.to_string());
                self.mark_aborted();
            }
        }
        result
    }

    async fn drive(&mut self, input: Vec<ContentBlock>) -> Result<bool> {
        let mut stack = vec![Frame::new(input)];

        while let Some(frame) = stack.pop() {
            if self.handle.is_aborted() {
                stack.clear();
                return Ok(false);
            }
            if self.consecutive_mistakes >= self.config.consecutive_mistake_limit {
                self.consecutive_mistakes = 0;
                return Err(TaskError::ConsecutiveMistakeLimitReached {
                    limit: self.config.consecutive_mistake_limit,
                });
            }

            match self.run_turn(&frame).await {
                Ok(TurnOutcome::Continue { next: Some(next) }) => stack.push(Frame::new(next)),
                Ok(TurnOutcome::Continue { next: None }) => {}
                Ok(TurnOutcome::Completed) => stack.clear(),
                Ok(TurnOutcome::Aborted) => {
                    stack.clear();
                    return Ok(false);
                }
                Ok(TurnOutcome::NoToolsUsed { notice }) => {
                    let retry = Frame {
                        input: notice,
                        retry_attempt: frame.retry_attempt,
                    };
                    self.retry_or_fail(TaskError::NoToolsUsed, retry, &mut stack)
                        .await?;
                }
                Err(error) if error.kind() == TaskErrorKind::Aborted && self.handle.is_aborted() => {
                    return Ok(false);
                }
                Err(error) => self.retry_or_fail(error, frame, &mut stack).await?,
            }
        }

        Ok(!self.handle.is_aborted())
    }

    /// Apply the retry policy to a failed frame
    async fn retry_or_fail(
        &mut self,
        error: TaskError,
        frame: Frame,
        stack: &mut Vec<Frame>,
    ) -> Result<()> {
        match self.retry.decide(&error, frame.retry_attempt) {
            RetryDecision::Propagate => Err(error),
            RetryDecision::Exhausted => {
                self.errors.push(error);
                Err(TaskError::MaxRetryExceeded {
                    attempts: self.retry.max_retry_attempts,
                    errors: std::mem::take(&mut self.errors),
                })
            }
            RetryDecision::Retry {
                next_attempt,
                delay,
            } => {
                tracing::warn!(
                    attempt = next_attempt,
                    max = self.retry.max_retry_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "retrying turn: {}",
                    error
                );
                self.errors.push(error);

                if !delay.is_zero() {
                    let cancel = self.handle.cancel_token();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {}
                    }
                }

                stack.push(Frame {
                    input: frame.input,
                    retry_attempt: next_attempt,
                });
                Ok(())
            }
        }
    }

    /// Run one request and its tool calls
    async fn run_turn(&mut self, frame: &Frame) -> Result<TurnOutcome> {
        let model = self.backend.model();
        let protocol = select_protocol(self.config.tool_protocol, &model);
        tracing::debug!(
            task_id = %self.config.task_id,
            attempt = frame.retry_attempt,
            protocol = %protocol,
            "starting turn"
        );

        let user = Message::user_with_content(frame.input.clone());
        let mut context = self.history.clone();
        context.push(user.clone());

        let mut metadata = RequestMetadata::new(self.config.task_id.clone(), protocol);
        if protocol == ToolProtocol::Native {
            metadata.tools = self.dispatcher.handler().definitions();
        }
        metadata.max_tokens = self.config.max_tokens;
        metadata.temperature = self.config.temperature;

        self.assembler.begin(protocol);
        let collected = self.collect(&context, &metadata).await;
        self.usage.merge(self.assembler.usage());
        if !collected? {
            return Ok(TurnOutcome::Aborted);
        }

        let extractor = self.tag_extractor(protocol);
        let turn = self.assembler.finish(&extractor)?;

        let assistant = Message::assistant(
            turn.content.clone(),
            AssistantMetadata {
                model: Some(model.id.clone()),
                usage: turn.usage.clone(),
                reasoning: turn.reasoning.clone(),
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
        );

        if !turn.has_tool_calls() {
            self.append(user);
            self.append(assistant);
            self.consecutive_mistakes += 1;
            tracing::debug!(mistakes = self.consecutive_mistakes, "turn used no tools");
            return Ok(TurnOutcome::NoToolsUsed {
                notice: vec![ContentBlock::text(no_tools_used_notice(
                    &self.config.completion_tool,
                ))],
            });
        }

        let calls = turn.tool_calls();
        let outcome = self
            .dispatcher
            .dispatch(&calls, &self.handle, &mut self.tool_mistakes)
            .await;

        if outcome.executed > 0 {
            self.consecutive_mistakes = 0;
        } else if !outcome.aborted {
            // Every call was malformed
            self.consecutive_mistakes += 1;
        }

        self.append(user);
        self.append(assistant);

        if outcome.aborted {
            return Ok(TurnOutcome::Aborted);
        }
        if outcome.completion_attempted {
            self.completion_attempted = true;
            return Ok(TurnOutcome::Completed);
        }
        let next = (!outcome.results.is_empty()).then_some(outcome.results);
        Ok(TurnOutcome::Continue { next })
    }

    /// Stream one response into the assembler.
    ///
    /// Returns `Ok(false)` when abort interrupted the request. The whole
    /// request, stream included, runs under the session timeout.
    async fn collect(&mut self, context: &[Message], metadata: &RequestMetadata) -> Result<bool> {
        let cancel = self.handle.cancel_token();
        let timeout = self.config.api_request_timeout;
        let backend = Arc::clone(&self.backend);
        let system_prompt = self.config.system_prompt.as_str();
        let assembler = &mut self.assembler;

        let request = async move {
            let mut stream = backend
                .create_stream(system_prompt, context, metadata)
                .await
                .map_err(TaskError::classify)?;
            while let Some(event) = stream.next().await {
                assembler.push(event)?;
            }
            Ok::<(), TaskError>(())
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("abort observed during request");
                Ok(false)
            }
            result = tokio::time::timeout(timeout, request) => match result {
                Ok(inner) => inner.map(|()| true),
                Err(_) => Err(TaskError::timed_out(timeout)),
            },
        }
    }

    /// Names recognized in tagged markup: the handler's tools plus the
    /// completion tool, which is always callable.
    fn tag_extractor(&self, protocol: ToolProtocol) -> TagExtractor {
        let names = self.dispatcher.handler().tool_names();
        if protocol == ToolProtocol::Tagged && names.is_empty() {
            tracing::warn!(
                completion_tool = %self.config.completion_tool,
                "tool handler lists no tools; only the completion tool is recognized in tagged markup"
            );
        }
        TagExtractor::new(
            names
                .into_iter()
                .chain(std::iter::once(self.config.completion_tool.clone())),
        )
    }

    fn append(&mut self, message: Message) {
        self.observers.message_added(&message);
        self.history.push(message);
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.status != status {
            self.status = status;
            self.observers.status_changed(status);
        }
    }

    fn mark_aborted(&mut self) {
        self.set_status(SessionStatus::Aborted);
        let reason = self
            .handle
            .abort_reason()
            .unwrap_or_else(|| "aborted".to_string());
        tracing::info!(task_id = %self.config.task_id, reason = %reason, "session aborted");
        self.observers.task_aborted(TaskAborted {
            task_id: self.config.task_id.clone(),
            reason,
        });
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("task_id", &self.config.task_id)
            .field("status", &self.status)
            .field("history_len", &self.history.len())
            .field("consecutive_mistakes", &self.consecutive_mistakes)
            .finish_non_exhaustive()
    }
}
