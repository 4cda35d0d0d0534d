//! HTTP chat provider
//!
//! Streams completions from an OpenAI-compatible chat endpoint over SSE.
//! The provider owns the conversation history: the turn's input message is
//! appended before the request, the assistant's full text after the stream
//! ends cleanly, and a failed turn rolls the history back so the session
//! can retry the same exchange.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{ChatModel, TextStream};
use crate::config::ModelConfig;
use crate::error::{QuillError, QuillResult};
use crate::interaction::Transcript;

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// SSE provider over an OpenAI-compatible `/chat/completions` endpoint
pub struct HttpChatModel {
    client: reqwest::Client,
    config: ModelConfig,
    history: Arc<Mutex<Vec<ChatMessage>>>,
    history_limit: usize,
}

impl HttpChatModel {
    pub fn new(config: ModelConfig, system_prompt: String, history_limit: usize) -> Self {
        let history = vec![ChatMessage {
            role: "system",
            content: system_prompt,
        }];
        Self {
            client: reqwest::Client::new(),
            config,
            history: Arc::new(Mutex::new(history)),
            history_limit,
        }
    }

    async fn stream_turn(&mut self, role: &'static str, content: String) -> QuillResult<TextStream> {
        let api_key = self
            .config
            .api_key()
            .ok_or_else(|| QuillError::provider(format!("{} is not set", self.config.api_key_env)))?;

        let mark = {
            let mut history = self.history.lock();
            let mark = history.len();
            history.push(ChatMessage { role, content });
            mark
        };

        let request = {
            let history = self.history.lock();
            serde_json::to_value(ChatRequest {
                model: &self.config.model,
                messages: &history,
                stream: true,
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
            })?
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                self.rollback(mark);
                return Err(QuillError::provider_retryable(e.to_string()));
            }
        };
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            self.rollback(mark);
            return Err(QuillError::provider(format!("{status}: {body}")));
        }

        let (tx, rx) = mpsc::unbounded_channel::<QuillResult<String>>();
        let history = self.history.clone();
        let history_limit = self.history_limit;
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseLineDecoder::default();
            let mut assistant = String::new();
            let mut failed = false;

            'outer: while let Some(item) = bytes.next().await {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        failed = true;
                        let _ = tx.send(Err(QuillError::provider_retryable(e.to_string())));
                        break;
                    }
                };
                for data in decoder.feed(&chunk) {
                    if data == "[DONE]" {
                        break 'outer;
                    }
                    if let Some(delta) = extract_delta(&data) {
                        if !delta.is_empty() {
                            assistant.push_str(&delta);
                            if tx.send(Ok(delta)).is_err() {
                                break 'outer;
                            }
                        }
                    }
                }
            }

            let mut history = history.lock();
            if failed {
                // Roll back the turn's input so a retry replays it.
                history.truncate(mark);
            } else {
                history.push(ChatMessage {
                    role: "assistant",
                    content: assistant,
                });
                trim_history(&mut history, history_limit);
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    fn rollback(&self, mark: usize) {
        self.history.lock().truncate(mark);
    }

    /// Number of retained messages, system prompt included
    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn stream_opening(&mut self, user_text: &str) -> QuillResult<TextStream> {
        self.stream_turn("user", user_text.to_string()).await
    }

    async fn stream_continuation(&mut self, transcript: &Transcript) -> QuillResult<TextStream> {
        self.stream_turn("user", transcript.render()).await
    }
}

/// Keep the system prompt plus the most recent messages
fn trim_history(history: &mut Vec<ChatMessage>, limit: usize) {
    if limit == 0 || history.len() <= limit {
        return;
    }
    let excess = history.len() - limit;
    history.drain(1..1 + excess);
}

/// Pull `choices[0].delta.content` out of one SSE data payload
fn extract_delta(data: &str) -> Option<String> {
    let value: Value = serde_json::from_str(data).ok()?;
    value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

/// Minimal line-oriented SSE decoder: collects `data:` payloads, tolerating
/// lines split across network chunks. Works on bytes so a UTF-8 sequence
/// split across chunks never corrupts the buffer.
#[derive(Default)]
struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_split_lines() {
        let mut decoder = SseLineDecoder::default();
        assert!(decoder.feed(b"data: {\"a\":").is_empty());
        let payloads = decoder.feed(b" 1}\n\ndata: [DONE]\n");
        assert_eq!(payloads, vec!["{\"a\": 1}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn decoder_ignores_non_data_lines() {
        let mut decoder = SseLineDecoder::default();
        let payloads = decoder.feed(b"event: ping\nretry: 100\ndata: x\n");
        assert_eq!(payloads, vec!["x".to_string()]);
    }

    #[test]
    fn delta_extraction() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"}}]}"#;
        assert_eq!(extract_delta(data), Some("Hello".to_string()));
        assert_eq!(extract_delta(r#"{"choices":[{"delta":{}}]}"#), None);
        assert_eq!(extract_delta("not json"), None);
    }

    #[test]
    fn history_trim_keeps_system_prompt() {
        let mut history = vec![ChatMessage {
            role: "system",
            content: "base".into(),
        }];
        for i in 0..10 {
            history.push(ChatMessage {
                role: "user",
                content: format!("m{i}"),
            });
        }
        trim_history(&mut history, 4);
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].role, "system");
        assert_eq!(history[1].content, "m7");
    }
}
