//! Runtime configuration
//!
//! All policy dials live here: the interaction turn cap, the per-run
//! interpreter ceiling, history bounds, model parameters, and logging.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{QuillError, QuillResult};

/// Default hard ceiling on model turns per interaction
pub const DEFAULT_MAX_TURNS: u32 = 15;

/// Default wall-clock ceiling for a single interpreter run, in seconds
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 60;

/// Default bound on retained conversation messages
pub const DEFAULT_HISTORY_LIMIT: usize = 64;

/// Top-level runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Hard ceiling on model turns per interaction
    pub max_turns: u32,
    /// Wall-clock ceiling for a single interpreter run, in seconds
    pub run_timeout_secs: u64,
    /// Bound on retained conversation messages per session
    pub history_limit: usize,
    /// Model parameters for the HTTP provider
    pub model: ModelConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            run_timeout_secs: DEFAULT_RUN_TIMEOUT_SECS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            model: ModelConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> QuillResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            QuillError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            QuillError::config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate dial ranges
    pub fn validate(&self) -> QuillResult<()> {
        if self.max_turns == 0 {
            return Err(QuillError::config("max_turns must be at least 1"));
        }
        if self.run_timeout_secs == 0 {
            return Err(QuillError::config("run_timeout_secs must be at least 1"));
        }
        Ok(())
    }

    /// Per-run interpreter ceiling as a `Duration`
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// Model parameters for the HTTP chat provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible chat completions endpoint
    pub base_url: String,
    /// Model name
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Sampling temperature
    pub temperature: Option<f64>,
    /// Maximum tokens per response
    pub max_tokens: Option<u32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "QUILL_API_KEY".to_string(),
            temperature: None,
            max_tokens: None,
        }
    }
}

impl ModelConfig {
    /// Resolve the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, compact, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
