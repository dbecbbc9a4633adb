use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use spool_agent::{
    ProtocolPreference, RetryBackoff, Session, SessionConfig, SessionHandle, SessionStatus,
    TaskErrorKind, ToolError, ToolHandler, ToolResult, no_tools_used_notice,
};
use spool_ai::{
    ContentBlock, Message, ModelBackend, ModelInfo, RequestMetadata, StreamEvent,
    StreamEventStream, ToolDefinition, ToolProtocol,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

enum Reply {
    Events(Vec<StreamEvent>),
    /// Yield these events, then never finish
    Stall(Vec<StreamEvent>),
    Fail(spool_ai::Error),
}

struct Request {
    history: Vec<Message>,
    protocol: ToolProtocol,
    tools: Vec<ToolDefinition>,
}

struct MockBackend {
    model: ModelInfo,
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Request>>,
}

impl MockBackend {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Self::with_model(
            ModelInfo::new("mock", "http://localhost").with_native_tool_calls(true),
            replies,
        )
    }

    fn with_model(model: ModelInfo, replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            model,
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Last message of the n-th request
    fn input_of(&self, n: usize) -> Message {
        self.requests.lock()[n].history.last().cloned().unwrap()
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    fn model(&self) -> ModelInfo {
        self.model.clone()
    }

    async fn create_stream(
        &self,
        _system_prompt: &str,
        history: &[Message],
        metadata: &RequestMetadata,
    ) -> spool_ai::Result<StreamEventStream> {
        self.requests.lock().push(Request {
            history: history.to_vec(),
            protocol: metadata.protocol,
            tools: metadata.tools.clone(),
        });

        let reply = self.replies.lock().pop_front();
        match reply {
            Some(Reply::Events(events)) => Ok(Box::pin(async_stream::stream! {
                for event in events {
                    yield event;
                }
            })),
            Some(Reply::Stall(events)) => Ok(Box::pin(async_stream::stream! {
                for event in events {
                    yield event;
                }
                futures::future::pending::<()>().await;
            })),
            Some(Reply::Fail(error)) => Err(error),
            None => Ok(Box::pin(futures::stream::empty::<StreamEvent>())),
        }
    }
}

/// Tool handler that records every call
struct RecordingTools {
    calls: AtomicU32,
    seen: Mutex<Vec<(String, Map<String, Value>)>>,
    abort_on_first: Mutex<Option<SessionHandle>>,
}

impl RecordingTools {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
            abort_on_first: Mutex::new(None),
        })
    }

    fn count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolHandler for RecordingTools {
    async fn handle(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        _cancel: CancellationToken,
    ) -> Result<Option<ToolResult>, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push((name.to_string(), arguments.clone()));
        if let Some(handle) = self.abort_on_first.lock().take() {
            handle.abort_with("stop after first tool");
        }
        Ok(Some(ToolResult::text(format!("{} ok", name))))
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        ["read_file", "list_files", "attempt_completion"]
            .into_iter()
            .map(|name| ToolDefinition::new(name, name, serde_json::json!({"type": "object"})))
            .collect()
    }
}

fn config() -> SessionConfig {
    SessionConfig::new()
        .with_task_id("integration")
        .with_retry_backoff(RetryBackoff::none())
}

fn complete() -> Reply {
    Reply::Events(vec![StreamEvent::tool_call(
        "done",
        "attempt_completion",
        r#"{"result":"finished"}"#,
    )])
}

#[tokio::test]
async fn test_end_to_end_text_and_tool_use() {
    let backend = MockBackend::new(vec![
        Reply::Events(vec![
            StreamEvent::text("我是一个编程助手。"),
            StreamEvent::tool_call("call_1", "read_file", r#"{"path":"README.md"}"#),
            StreamEvent::usage(120, 30),
            StreamEvent::Usage {
                input_tokens: 0,
                output_tokens: 12,
                cache_write_tokens: None,
                cache_read_tokens: Some(40),
                total_cost: None,
            },
        ]),
        complete(),
    ]);
    let tools = RecordingTools::new();
    let mut session = Session::new(config(), backend.clone(), tools.clone());

    let completed = session
        .run(vec![ContentBlock::text("请简单介绍一下你自己")])
        .await
        .unwrap();
    assert!(completed);
    assert_eq!(session.status(), SessionStatus::Completed);

    let assistant = &session.history()[1];
    let content = assistant.content();
    assert_eq!(content.len(), 2);
    assert_eq!(content[1].as_text(), Some("我是一个编程助手。"));
    let call = content[0].as_tool_use().unwrap();
    assert_eq!(call.name, "read_file");
    assert_eq!(call.arguments.get("path"), Some(&Value::String("README.md".into())));

    match assistant {
        Message::Assistant { metadata, .. } => {
            assert_eq!(metadata.usage.input, 120);
            assert_eq!(metadata.usage.output, 42);
            assert_eq!(metadata.usage.cache_read, 40);
        }
        other => panic!("expected assistant message, got {:?}", other),
    }

    assert_eq!(tools.count(), 2);
    assert_eq!(session.usage().input, 120);
    assert_eq!(session.usage().output, 42);
}

#[tokio::test]
async fn test_no_tools_turn_counts_one_mistake_and_sends_notice() {
    // Limit 2: one tool-less turn is tolerated
    let backend = MockBackend::new(vec![
        Reply::Events(vec![StreamEvent::text("Just chatting.")]),
        complete(),
    ]);
    let mut session = Session::new(
        config().with_consecutive_mistake_limit(2),
        backend.clone(),
        RecordingTools::new(),
    );
    assert!(session.start("do something").await.unwrap());
    assert_eq!(
        backend.input_of(1).text(),
        no_tools_used_notice("attempt_completion")
    );
    assert_eq!(session.consecutive_mistakes(), 0);
    // user, assistant (no tools), notice, assistant (completion)
    assert_eq!(session.history().len(), 4);

    // Limit 1: the same single tool-less turn is already fatal
    let backend = MockBackend::new(vec![
        Reply::Events(vec![StreamEvent::text("Just chatting.")]),
        complete(),
    ]);
    let mut session = Session::new(
        config().with_consecutive_mistake_limit(1),
        backend.clone(),
        RecordingTools::new(),
    );
    let err = session.start("do something").await.unwrap_err();
    assert_eq!(err.kind(), TaskErrorKind::ConsecutiveMistakeLimitReached);
    assert_eq!(backend.request_count(), 1);
    assert_eq!(session.status(), SessionStatus::Aborted);
}

#[tokio::test]
async fn test_retry_budget_collects_exactly_max_plus_one_errors() {
    let max = 3;
    let replies = (0..=max)
        .map(|_| Reply::Fail(spool_ai::Error::Timeout("upstream".into())))
        .collect();
    let backend = MockBackend::new(replies);
    let mut session = Session::new(
        config().with_max_retry_attempts(max),
        backend.clone(),
        RecordingTools::new(),
    );

    let err = session.start("x").await.unwrap_err();
    assert_eq!(err.kind(), TaskErrorKind::MaxRetryExceeded);
    assert_eq!(err.collected_errors().len(), (max + 1) as usize);
    assert!(
        err.collected_errors()
            .iter()
            .all(|e| e.kind() == TaskErrorKind::ApiTimeout)
    );
    assert_eq!(backend.request_count(), (max + 1) as usize);
    assert_eq!(session.status(), SessionStatus::Aborted);
    // Failed requests never reach the history
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn test_retry_resends_identical_input() {
    let backend = MockBackend::new(vec![
        Reply::Events(vec![
            StreamEvent::text("partial answer"),
            StreamEvent::error(None, "connection reset"),
        ]),
        complete(),
    ]);
    let mut session = Session::new(config(), backend.clone(), RecordingTools::new());

    assert!(session.start("x").await.unwrap());
    assert_eq!(backend.request_count(), 2);
    let first = backend.requests.lock()[0].history.clone();
    let second = backend.requests.lock()[1].history.clone();
    assert_eq!(first.len(), second.len());
    assert_eq!(first.last().map(Message::text), second.last().map(Message::text));
}

#[tokio::test]
async fn test_retry_budget_applies_per_frame() {
    let backend = MockBackend::new(vec![
        Reply::Fail(spool_ai::Error::api_status(500, "server_error", "boom")),
        Reply::Events(vec![StreamEvent::tool_call("a", "read_file", "{}")]),
        Reply::Fail(spool_ai::Error::api_status(500, "server_error", "boom")),
        complete(),
    ]);
    let mut session = Session::new(
        config().with_max_retry_attempts(1),
        backend.clone(),
        RecordingTools::new(),
    );

    // Each failure is retried once and the run completes
    assert!(session.start("x").await.unwrap());
    assert_eq!(backend.request_count(), 4);
}

#[tokio::test]
async fn test_non_retryable_backend_error_propagates() {
    let backend = MockBackend::new(vec![Reply::Fail(spool_ai::Error::Aborted), complete()]);
    let mut session = Session::new(config(), backend.clone(), RecordingTools::new());

    let err = session.start("x").await.unwrap_err();
    assert_eq!(err.kind(), TaskErrorKind::Aborted);
    assert_eq!(backend.request_count(), 1);
}

#[tokio::test]
async fn test_usage_from_failed_attempts_is_kept() {
    let backend = MockBackend::new(vec![
        Reply::Events(vec![
            StreamEvent::usage(10, 1),
            StreamEvent::error(Some("500"), "boom"),
        ]),
        Reply::Events(vec![
            StreamEvent::tool_call("done", "attempt_completion", "{}"),
            StreamEvent::usage(3, 2),
        ]),
    ]);
    let mut session = Session::new(config(), backend, RecordingTools::new());

    assert!(session.start("x").await.unwrap());
    assert_eq!(session.usage().input, 13);
    assert_eq!(session.usage().output, 3);

    session.reset_usage();
    assert_eq!(session.usage().total_tokens(), 0);
}

#[tokio::test]
async fn test_abort_after_first_of_three_tool_calls() {
    let backend = MockBackend::new(vec![Reply::Events(vec![
        StreamEvent::tool_call("a", "read_file", r#"{"path":"1"}"#),
        StreamEvent::tool_call("b", "read_file", r#"{"path":"2"}"#),
        StreamEvent::tool_call("c", "read_file", r#"{"path":"3"}"#),
    ])]);
    let tools = RecordingTools::new();
    let mut session = Session::new(config(), backend.clone(), tools.clone());
    *tools.abort_on_first.lock() = Some(session.handle());

    let aborted_with = Arc::new(Mutex::new(None));
    let a = Arc::clone(&aborted_with);
    let _ = session
        .observers()
        .on_task_aborted(move |event| *a.lock() = Some(event.reason.clone()));

    let completed = session.start("read three files").await.unwrap();
    assert!(!completed);
    assert_eq!(tools.count(), 1);
    assert_eq!(session.status(), SessionStatus::Aborted);
    assert_eq!(backend.request_count(), 1);
    assert_eq!(aborted_with.lock().as_deref(), Some("stop after first tool"));
}

#[tokio::test(start_paused = true)]
async fn test_abort_during_stream() {
    let backend = MockBackend::new(vec![Reply::Stall(vec![StreamEvent::text("thinking...")])]);
    let tools = RecordingTools::new();
    let mut session = Session::new(config(), backend, tools.clone());

    let handle = session.handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.abort();
    });

    assert!(!session.start("x").await.unwrap());
    assert_eq!(session.status(), SessionStatus::Aborted);
    assert_eq!(tools.count(), 0);
    assert!(session.history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout_is_api_timeout() {
    let backend = MockBackend::new(vec![Reply::Stall(vec![StreamEvent::text("slow")])]);
    let mut session = Session::new(
        config()
            .with_api_request_timeout(Duration::from_secs(5))
            .with_max_retry_attempts(0),
        backend,
        RecordingTools::new(),
    );

    let err = session.start("x").await.unwrap_err();
    assert_eq!(err.kind(), TaskErrorKind::MaxRetryExceeded);
    assert_eq!(err.collected_errors().len(), 1);
    assert_eq!(err.collected_errors()[0].kind(), TaskErrorKind::ApiTimeout);
}

#[tokio::test(start_paused = true)]
async fn test_backend_failures_back_off_and_missing_tools_do_not() {
    let backend = MockBackend::new(vec![
        Reply::Fail(spool_ai::Error::Sse("reset".into())),
        Reply::Fail(spool_ai::Error::Sse("reset".into())),
        complete(),
    ]);
    let mut session = Session::new(
        config().with_retry_backoff(RetryBackoff::default()),
        backend,
        RecordingTools::new(),
    );
    let started = tokio::time::Instant::now();
    assert!(session.start("x").await.unwrap());
    // 1s, then 2s
    assert!(started.elapsed() >= Duration::from_secs(3));

    let backend = MockBackend::new(vec![
        Reply::Events(vec![StreamEvent::text("no tools")]),
        complete(),
    ]);
    let mut session = Session::new(
        config().with_retry_backoff(RetryBackoff::default()),
        backend,
        RecordingTools::new(),
    );
    let started = tokio::time::Instant::now();
    assert!(session.start("x").await.unwrap());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_partial_tool_calls_without_close_are_executed() {
    let backend = MockBackend::new(vec![
        Reply::Events(vec![
            StreamEvent::tool_call_start(0, "call_p", "list_files"),
            StreamEvent::tool_call_delta(0, r#"{"pa"#),
            StreamEvent::tool_call_delta(0, r#"th":"sr"#),
            StreamEvent::tool_call_delta(0, r#"c"}"#),
        ]),
        complete(),
    ]);
    let tools = RecordingTools::new();
    let mut session = Session::new(config(), backend, tools.clone());

    assert!(session.start("list").await.unwrap());
    let seen = tools.seen.lock();
    assert_eq!(seen[0].0, "list_files");
    assert_eq!(seen[0].1.get("path"), Some(&Value::String("src".into())));
}

#[tokio::test]
async fn test_tagged_protocol_round() {
    let model = ModelInfo::new("plain", "http://localhost").with_native_tool_calls(false);
    let backend = MockBackend::with_model(
        model,
        vec![
            Reply::Events(vec![
                StreamEvent::text("I'll look around.\ntool_call>\n<list_files>\n<path>.</path>\n"),
                StreamEvent::text("</list_files>"),
            ]),
            Reply::Events(vec![StreamEvent::text(
                "<attempt_completion>\n<result>done</result>\n</attempt_completion>",
            )]),
        ],
    );
    let tools = RecordingTools::new();
    let mut session = Session::new(config(), backend.clone(), tools.clone());

    assert!(session.start("explore").await.unwrap());
    {
        let requests = backend.requests.lock();
        assert_eq!(requests[0].protocol, ToolProtocol::Tagged);
        assert!(requests[0].tools.is_empty());
    }
    let seen = tools.seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, "list_files");
    assert_eq!(seen[0].1.get("path"), Some(&Value::String(".".into())));
    assert_eq!(seen[1].0, "attempt_completion");
}

/// Handler that only implements `handle` and lists no definitions
struct HandleOnly {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ToolHandler for HandleOnly {
    async fn handle(
        &self,
        name: &str,
        _arguments: &Map<String, Value>,
        _cancel: CancellationToken,
    ) -> Result<Option<ToolResult>, ToolError> {
        self.calls.lock().push(name.to_string());
        Ok(Some(ToolResult::text("ok")))
    }
}

#[tokio::test]
async fn test_tagged_completion_without_tool_definitions() {
    let model = ModelInfo::new("plain", "http://localhost").with_native_tool_calls(false);
    let backend = MockBackend::with_model(
        model,
        vec![Reply::Events(vec![StreamEvent::text(
            "<attempt_completion>\n<result>done</result>\n</attempt_completion>",
        )])],
    );
    let tools = Arc::new(HandleOnly {
        calls: Mutex::new(Vec::new()),
    });
    let mut session = Session::new(config(), backend.clone(), tools.clone());

    assert!(session.start("x").await.unwrap());
    assert_eq!(session.status(), SessionStatus::Completed);
    assert!(session.completion_attempted());
    assert_eq!(*tools.calls.lock(), vec!["attempt_completion".to_string()]);
    assert_eq!(backend.request_count(), 1);
}

#[tokio::test]
async fn test_tagged_custom_completion_tool_is_recognized() {
    let model = ModelInfo::new("plain", "http://localhost").with_native_tool_calls(false);
    let backend = MockBackend::with_model(
        model,
        vec![Reply::Events(vec![StreamEvent::text(
            "All set.\n<finish>\n<result>done</result>\n</finish>",
        )])],
    );
    let tools = Arc::new(HandleOnly {
        calls: Mutex::new(Vec::new()),
    });
    let mut session = Session::new(config().with_completion_tool("finish"), backend, tools.clone());

    assert!(session.start("x").await.unwrap());
    assert_eq!(*tools.calls.lock(), vec!["finish".to_string()]);
}

#[tokio::test]
async fn test_native_preference_sends_tool_definitions() {
    let backend = MockBackend::new(vec![complete()]);
    let mut session = Session::new(
        config().with_tool_protocol(ProtocolPreference::Native),
        backend.clone(),
        RecordingTools::new(),
    );
    session.start("x").await.unwrap();
    let requests = backend.requests.lock();
    assert_eq!(requests[0].protocol, ToolProtocol::Native);
    assert_eq!(requests[0].tools.len(), 3);
}

#[tokio::test]
async fn test_malformed_call_is_reported_back() {
    let backend = MockBackend::new(vec![
        Reply::Events(vec![StreamEvent::tool_call("bad", "read_file", r#"{"path":"#)]),
        complete(),
    ]);
    let tools = RecordingTools::new();
    let mut session = Session::new(config(), backend.clone(), tools.clone());

    assert!(session.start("x").await.unwrap());
    // Only the completion call reached the handler
    assert_eq!(tools.count(), 1);
    let input = backend.input_of(1);
    assert!(matches!(
        &input.content()[0],
        ContentBlock::ToolResult { tool_use_id, is_error: true, .. } if tool_use_id == "bad"
    ));
    assert_eq!(session.tool_mistakes().get("read_file"), 1);
}

#[tokio::test]
async fn test_message_notifications_follow_history() {
    let backend = MockBackend::new(vec![
        Reply::Events(vec![StreamEvent::tool_call("a", "read_file", "{}")]),
        complete(),
    ]);
    let mut session = Session::new(config(), backend, RecordingTools::new());
    let roles = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&roles);
    let sub = session
        .observers()
        .on_message_added(move |message| r.lock().push(message.role()));

    assert!(session.start("x").await.unwrap());
    assert_eq!(
        *roles.lock(),
        vec!["user", "assistant", "user", "assistant"]
    );
    assert_eq!(roles.lock().len(), session.history().len());
    sub.unsubscribe();
}
