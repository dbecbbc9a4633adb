//! Configuration file support

use serde::{Deserialize, Serialize};
use spool_agent::{ProtocolPreference, SessionConfig};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4.1";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for spool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model to use
    pub model: Option<String>,
    /// Base URL of an OpenAI-compatible server
    pub base_url: Option<String>,
    /// API key (alternative to the environment variable)
    pub api_key: Option<String>,
    /// Whether the model emits structured tool calls
    pub native_tool_calls: Option<bool>,
    /// Tool protocol preference (auto, native, tagged)
    pub tool_protocol: Option<ProtocolPreference>,
    pub max_retry_attempts: Option<u32>,
    pub consecutive_mistake_limit: Option<u32>,
    pub api_request_timeout_secs: Option<u64>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Custom system prompt file path
    pub system_prompt_file: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("spool")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("SPOOL_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "failed to parse config file: {}", e);
                Self::default()
            }),
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Write the commented example config if no file exists yet
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, example_config())?;
        Ok(path)
    }

    /// Get the API key, checking config then env
    pub fn get_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    /// Session parameters with file values layered over the engine defaults
    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::default();
        if let Some(protocol) = self.tool_protocol {
            config.tool_protocol = protocol;
        }
        if let Some(attempts) = self.max_retry_attempts {
            config.max_retry_attempts = attempts;
        }
        if let Some(limit) = self.consecutive_mistake_limit {
            config.consecutive_mistake_limit = limit;
        }
        if let Some(secs) = self.api_request_timeout_secs {
            config.api_request_timeout = Duration::from_secs(secs);
        }
        config.max_tokens = self.max_tokens;
        config.temperature = self.temperature;
        config
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# spool configuration file
# Place at ~/.config/spool/config.toml (Linux/Mac) or %APPDATA%\spool\config.toml (Windows)
# Override the location with SPOOL_CONFIG_PATH.

# Model to use
model = "gpt-4.1"

# Any server speaking the OpenAI chat completions protocol
base_url = "https://api.openai.com/v1"

# Whether the model emits structured tool calls
native_tool_calls = true

# Tool protocol: auto, native or tagged
tool_protocol = "auto"

# Retries of a single turn before the session fails
max_retry_attempts = 3

# Turns without a usable tool call before the session fails
consecutive_mistake_limit = 3

# Deadline for one request, streaming included
api_request_timeout_secs = 60

# Custom system prompt file (optional)
# system_prompt_file = "~/.config/spool/system_prompt.txt"

# API key (optional, OPENAI_API_KEY is used otherwise)
# api_key = "sk-..."
"#
}
