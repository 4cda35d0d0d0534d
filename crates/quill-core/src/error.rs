//! Error types for the Quill runtime
//!
//! A single `QuillError` enum covers every fallible seam in the core. Errors
//! produced by code the model asked us to execute are *not* represented here:
//! those are captured into the turn transcript and fed back to the model.

use thiserror::Error;

/// Result type alias for Quill runtime operations
pub type QuillResult<T> = Result<T, QuillError>;

/// Main error type for the Quill runtime
#[derive(Error, Debug, Clone)]
pub enum QuillError {
    /// Configuration loading or validation errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// An inbound frame was rejected; `code` is one of the protocol
    /// rejection codes (`invalid_json`, `invalid_envelope`, `missing_type`,
    /// `missing_payload`, `unsupported_envelope`)
    #[error("Protocol error ({code}): {message}")]
    Protocol { code: &'static str, message: String },

    /// LLM provider errors
    #[error("Provider error: {message}")]
    Provider { message: String, retryable: bool },

    /// Interpreter-level faults (not errors raised by executed code)
    #[error("Interpreter error: {message}")]
    Interpreter { message: String },

    /// A run was started while another run was still in progress
    #[error("Run already in progress")]
    RunInProgress,

    /// The interpreter thread or a session task is no longer reachable
    #[error("Session closed")]
    SessionClosed,

    /// A second interaction was started while one was active
    #[error("Interaction already active")]
    InteractionActive,

    /// JSON encode/decode errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// Transport I/O errors
    #[error("Transport error: {message}")]
    Transport { message: String },
}

impl QuillError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn protocol(code: &'static str, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn provider_retryable(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn interpreter(message: impl Into<String>) -> Self {
        Self::Interpreter {
            message: message.into(),
        }
    }

    pub fn json(message: impl Into<String>) -> Self {
        Self::Json {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { retryable: true, .. })
    }
}

impl From<serde_json::Error> for QuillError {
    fn from(err: serde_json::Error) -> Self {
        Self::json(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_flag() {
        assert!(QuillError::provider_retryable("overloaded").is_retryable());
        assert!(!QuillError::provider("bad request").is_retryable());
        assert!(!QuillError::RunInProgress.is_retryable());
    }

    #[test]
    fn protocol_code_in_display() {
        let err = QuillError::protocol("invalid_json", "trailing garbage");
        assert!(err.to_string().contains("invalid_json"));
    }
}
