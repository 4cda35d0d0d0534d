//! Scripted chat model
//!
//! A deterministic [`ChatModel`] for tests and offline development: each
//! call pops the next scripted turn and streams its chunks. Inputs are
//! recorded so tests can assert what the loop fed back.

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::{ChatModel, TextStream};
use crate::error::{QuillError, QuillResult};
use crate::interaction::Transcript;

/// What the loop asked the model for
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedInput {
    Opening(String),
    Continuation(Transcript),
}

/// Deterministic model double; see the module docs
pub struct ScriptedChatModel {
    turns: VecDeque<Vec<QuillResult<String>>>,
    inputs: Arc<Mutex<Vec<ScriptedInput>>>,
}

impl ScriptedChatModel {
    /// Build from one chunk list per turn; turns past the script's end
    /// stream nothing.
    pub fn new(turns: Vec<Vec<&str>>) -> Self {
        Self {
            turns: turns
                .into_iter()
                .map(|chunks| chunks.into_iter().map(|c| Ok(c.to_string())).collect())
                .collect(),
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A turn that fails mid-stream with a provider error
    pub fn push_failing_turn(&mut self, chunks: Vec<&str>, error: &str) {
        let mut turn: Vec<QuillResult<String>> =
            chunks.into_iter().map(|c| Ok(c.to_string())).collect();
        turn.push(Err(QuillError::provider(error)));
        self.turns.push_back(turn);
    }

    /// Shared view of the recorded inputs
    pub fn inputs(&self) -> Arc<Mutex<Vec<ScriptedInput>>> {
        self.inputs.clone()
    }

    fn next_stream(&mut self) -> TextStream {
        let chunks = self.turns.pop_front().unwrap_or_default();
        Box::pin(stream::iter(chunks))
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn stream_opening(&mut self, user_text: &str) -> QuillResult<TextStream> {
        self.inputs
            .lock()
            .push(ScriptedInput::Opening(user_text.to_string()));
        Ok(self.next_stream())
    }

    async fn stream_continuation(&mut self, transcript: &Transcript) -> QuillResult<TextStream> {
        self.inputs
            .lock()
            .push(ScriptedInput::Continuation(transcript.clone()));
        Ok(self.next_stream())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn turns_pop_in_order_and_inputs_are_recorded() {
        let mut model = ScriptedChatModel::new(vec![vec!["a", "b"], vec!["c"]]);

        let mut first = model.stream_opening("hi").await.unwrap();
        let mut got = Vec::new();
        while let Some(chunk) = first.next().await {
            got.push(chunk.unwrap());
        }
        assert_eq!(got, vec!["a", "b"]);

        let transcript = Transcript {
            logs: Some("2\n".to_string()),
            error: None,
        };
        let mut second = model.stream_continuation(&transcript).await.unwrap();
        assert_eq!(second.next().await.unwrap().unwrap(), "c");

        // Past the script's end: an empty stream.
        let mut third = model.stream_continuation(&transcript).await.unwrap();
        assert!(third.next().await.is_none());

        let inputs = model.inputs();
        let inputs = inputs.lock();
        assert_eq!(inputs[0], ScriptedInput::Opening("hi".to_string()));
        assert_eq!(inputs[1], ScriptedInput::Continuation(transcript.clone()));
    }
}
