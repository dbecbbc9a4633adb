//! spool-ai: Model backend abstraction layer
//!
//! This crate defines the conversation types, the raw streaming event union
//! that backends emit, and the `ModelBackend` trait the session engine drives.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use providers::ModelBackend;
pub use stream::{StreamEvent, StreamEventStream};
pub use types::*;
