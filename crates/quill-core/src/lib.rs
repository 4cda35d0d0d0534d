//! Quill core runtime
//!
//! An agentic chat runtime whose wire protocol between the language model
//! and the client is Markdown. The model emits one streaming response that
//! interleaves prose, executable code fences, and structured data fences;
//! this crate parses that stream incrementally, executes code fences in a
//! persistent per-session JavaScript context, streams data fences to named
//! client-side targets, and loops on the captured console output until the
//! model has nothing left to run.
//!
//! # Components
//!
//! - [`parser`] - incremental fenced-markdown parser; never buffers to end
//!   of stream, never errors.
//! - [`reactive`] - observably-mutable records with hidden identities and
//!   mutation patches.
//! - [`interpreter`] - streaming statement execution in an embedded
//!   QuickJS context shared across a session.
//! - [`mounts`] - declarative UI mounts: snapshots, patch forwarding,
//!   pending results, named callbacks.
//! - [`interaction`] - the model → parser → interpreter → transcript loop,
//!   bounded by the turn cap.
//! - [`session`] - per-client ownership of all of the above.
//! - [`protocol`] - the `{type, payload}` envelopes on the wire.
//! - [`llm`] - the model seam: an SSE HTTP provider and a scripted double.

pub mod config;
pub mod error;
pub mod interaction;
pub mod interpreter;
pub mod llm;
pub mod mounts;
pub mod parser;
pub mod protocol;
pub mod reactive;
pub mod session;
pub mod targets;

pub use config::{LoggingConfig, ModelConfig, RuntimeConfig};
pub use error::{QuillError, QuillResult};
pub use interaction::Transcript;
pub use interpreter::{
    Interpreter, InterpreterConfig, RunEvent, RunHandle, RunOptions, RunResult,
};
pub use llm::{
    ChatModel, HttpChatModel, ScriptedChatModel, SkillDefinition, SystemPromptBuilder, TextStream,
};
pub use mounts::MountManager;
pub use parser::{FenceScanner, ScanEvent, Segment};
pub use protocol::{decode_inbound, encode_outbound, Inbound, LogLevel, Outbound, RawFrame};
pub use reactive::{Patch, PatchOp, PathSeg, ReactiveRegistry};
pub use session::Session;
pub use targets::TargetRegistry;
