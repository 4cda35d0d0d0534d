//! LLM seam
//!
//! The interaction loop consumes a model purely as a stream of text chunks
//! with a history contract: the model appends successful assistant output
//! to its own history and rolls back on provider error so the session can
//! retry. Two implementations ship here: an SSE-decoding HTTP provider and
//! a scripted double for tests.

mod http;
mod prompt;
mod scripted;

pub use http::HttpChatModel;
pub use prompt::{SkillDefinition, SystemPromptBuilder, BASE_SYSTEM_PROMPT};
pub use scripted::{ScriptedChatModel, ScriptedInput};

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::error::QuillResult;
use crate::interaction::Transcript;

/// Stream of assistant text chunks
pub type TextStream = Pin<Box<dyn Stream<Item = QuillResult<String>> + Send>>;

/// One model per session. Implementations own their conversation history.
#[async_trait]
pub trait ChatModel: Send {
    /// Stream the assistant response to the user's opening message
    async fn stream_opening(&mut self, user_text: &str) -> QuillResult<TextStream>;

    /// Stream the response to the prior turn's captured transcript
    async fn stream_continuation(&mut self, transcript: &Transcript) -> QuillResult<TextStream>;
}
