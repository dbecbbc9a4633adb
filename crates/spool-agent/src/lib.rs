//! spool-agent: Streaming tool-call session engine
//!
//! This crate drives multi-turn conversations with a model backend:
//! it reassembles streamed tool calls, executes them, and decides whether
//! to continue, retry, or stop.

pub mod assembler;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod observer;
pub mod protocol;
pub mod reassembler;
pub mod retry;
pub mod session;
pub mod tags;
pub mod tool;
pub mod usage;

pub use assembler::{AssembledTurn, ResponseAssembler, assemble};
pub use config::{DEFAULT_COMPLETION_TOOL, SessionConfig};
pub use dispatcher::{DispatchOutcome, ToolDispatcher, ToolMistakes};
pub use error::{Result, TaskError, TaskErrorKind};
pub use handle::SessionHandle;
pub use observer::{ObserverBus, Subscription, TaskAborted, TaskCompleted};
pub use protocol::{ProtocolPreference, select_protocol};
pub use reassembler::ToolCallReassembler;
pub use retry::{RetryBackoff, RetryDecision, RetryPolicy};
pub use session::{Session, SessionStatus, no_tools_used_notice};
pub use tags::{TagExtraction, TagExtractor, strip_artifacts};
pub use tool::{BoxedTool, Tool, ToolError, ToolHandler, ToolRegistry, ToolResult, to_definition};
pub use usage::UsageAccumulator;
