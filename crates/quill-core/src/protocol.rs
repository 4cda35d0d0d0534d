//! Wire protocol envelopes
//!
//! One long-lived full-duplex channel per session carries UTF-8 JSON
//! envelopes of shape `{type, payload}`. Outbound envelopes are serialized
//! with serde; inbound frames go through a staged decoder so that each
//! rejection maps to a distinct error code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::reactive::Patch;

/// Log levels carried on `log_line` envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Server-to-client envelopes
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Outbound {
    Session(SessionPayload),
    AssistantMessage(AssistantMessagePayload),
    MarkdownChunk(MarkdownChunkPayload),
    Mount(MountFramePayload),
    DataPatch(DataPatchPayload),
    StreamedDataReset(StreamedDataResetPayload),
    StreamedDataChunk(StreamedDataChunkPayload),
    Trace(TracePayload),
    LogLine(LogLinePayload),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessagePayload {
    pub interaction_id: String,
    pub message_id: String,
    pub markdown: String,
    pub blocks: Vec<BlockSummary>,
}

/// Per-block metadata attached to the end-of-turn assistant message
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSummary {
    pub index: u32,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkdownChunkPayload {
    pub interaction_id: String,
    pub message_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountFramePayload {
    pub mount_id: String,
    pub ui_source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streamed_data_id: Option<String>,
    pub output_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_names: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPatchPayload {
    pub mount_id: String,
    pub patches: Vec<Patch>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamedDataResetPayload {
    pub streamed_data_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamedDataChunkPayload {
    pub streamed_data_id: String,
    pub chunk: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TracePayload {
    pub interaction_id: String,
    pub message_id: String,
    pub text: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LogLinePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<DateTime<Utc>>,
    pub lvl: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl Outbound {
    /// Operator log line with an error code, stamped now
    pub fn log_code(lvl: LogLevel, code: &str, msg: impl Into<String>) -> Self {
        Outbound::LogLine(LogLinePayload {
            t: Some(Utc::now()),
            lvl,
            msg: Some(msg.into()),
            code: Some(code.to_string()),
            ..Default::default()
        })
    }
}

/// Client-to-server envelopes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Inbound {
    UserMessage(UserMessagePayload),
    UiSubmit(UiSubmitPayload),
    CallbackInvoke(CallbackInvokePayload),
    ClientLog(ClientLogPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessagePayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiSubmitPayload {
    pub mount_id: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackInvokePayload {
    pub mount_id: String,
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientLogPayload {
    pub lvl: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A raw transport frame before decoding
#[derive(Debug, Clone)]
pub enum RawFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Why an inbound frame was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: &'static str,
    pub detail: String,
}

impl Rejection {
    fn new(code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

/// Decode an inbound frame. Frames may arrive as strings or raw bytes; all
/// must decode as UTF-8 and then parse as a `{type, payload}` object.
pub fn decode_inbound(frame: &RawFrame) -> Result<Inbound, Rejection> {
    let text: &str = match frame {
        RawFrame::Text(s) => s,
        RawFrame::Binary(bytes) => std::str::from_utf8(bytes)
            .map_err(|e| Rejection::new("invalid_envelope", format!("not UTF-8: {e}")))?,
    };

    let value: Value = serde_json::from_str(text)
        .map_err(|e| Rejection::new("invalid_json", e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| Rejection::new("invalid_envelope", "frame is not an object"))?;

    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Rejection::new("missing_type", "no type field"))?;
    let payload = obj
        .get("payload")
        .ok_or_else(|| Rejection::new("missing_payload", "no payload field"))?;

    if !matches!(
        kind,
        "user_message" | "ui_submit" | "callback_invoke" | "client_log"
    ) {
        return Err(Rejection::new(
            "unsupported_envelope",
            format!("unknown type {kind}"),
        ));
    }

    serde_json::from_value(serde_json::json!({
        "type": kind,
        "payload": payload,
    }))
    .map_err(|e| Rejection::new("invalid_envelope", e.to_string()))
}

/// Encode an outbound envelope as a JSON text frame
pub fn encode_outbound(envelope: &Outbound) -> String {
    // Outbound envelopes contain only JSON-representable data.
    serde_json::to_string(envelope).unwrap_or_else(|e| {
        format!(r#"{{"type":"log_line","payload":{{"lvl":"error","msg":"encode failure: {e}"}}}}"#)
    })
}
