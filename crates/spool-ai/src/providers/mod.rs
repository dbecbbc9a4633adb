//! Model backend implementations

pub mod openai;

use crate::{Error, Message, ModelInfo, RequestMetadata, Result, StreamEventStream};
use async_trait::async_trait;

/// A model backend that streams raw events for one request
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// The model currently served, including its capabilities.
    ///
    /// Called once per turn; the answer may change between turns.
    fn model(&self) -> ModelInfo;

    /// Start streaming a response for the given history
    async fn create_stream(
        &self,
        system_prompt: &str,
        history: &[Message],
        metadata: &RequestMetadata,
    ) -> Result<StreamEventStream>;
}

/// Get an API key from environment or provided value
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided {
        return Ok(key.to_string());
    }

    std::env::var(env_var).map_err(|_| Error::InvalidApiKey)
}
