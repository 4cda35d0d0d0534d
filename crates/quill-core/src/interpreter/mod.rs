//! Streaming JavaScript interpreter
//!
//! One persistent evaluation context per session, hosted on a dedicated OS
//! thread that owns the embedded QuickJS runtime (the engine is not `Send`).
//! Statements execute as their text streams in, before the closing fence is
//! seen; top-level bindings are hoisted into the shared context so later
//! statements and later runs observe them. Console output is captured into
//! a per-run buffer, and a wall-clock ceiling bounds every run.
//!
//! The async side talks to the engine thread over a command channel:
//! feeding source, resolving mount results, dispatching callbacks, and
//! stopping are all commands; statement outcomes flow back as events.

mod bindings;
mod engine;
mod statement;

pub use bindings::{classify, StatementKind};
pub use statement::StatementSplitter;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::config::DEFAULT_RUN_TIMEOUT_SECS;
use crate::error::{QuillError, QuillResult};
use crate::protocol::MountFramePayload;
use crate::reactive::{Patch, ReactiveRegistry, Subscription};
use crate::targets::TargetRegistry;

use engine::{EngineCommand, StopState};

/// Interpreter construction parameters
#[derive(Debug, Clone, Default)]
pub struct InterpreterConfig {
    /// Host-provided globals visible to executed code (skill globals)
    pub globals: HashMap<String, Value>,
}

/// Per-run execution options
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Wall-clock ceiling for the whole run
    pub timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
        }
    }
}

/// Events produced while a run executes
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// One statement finished; `logs` is the console delta captured during
    /// it, `error` its failure if any
    Statement {
        logs: String,
        error: Option<String>,
    },
    /// The run resolved: full captured output plus the first error
    Finished {
        logs: String,
        error: Option<String>,
    },
}

/// Final outcome of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResult {
    pub logs: String,
    pub error: Option<String>,
}

/// A mount registered by executed code, crossing from the engine thread to
/// the session. The patch subscription is established synchronously at
/// registration so no mutation emitted after `mount()` can be missed.
pub struct MountEvent {
    pub frame: MountFramePayload,
    pub patches: Option<(Subscription, mpsc::UnboundedReceiver<Patch>)>,
}

/// Engine-to-session events
pub enum EngineEvent {
    Mount(MountEvent),
}

/// Handle to one session's interpreter thread
pub struct Interpreter {
    commands: mpsc::Sender<EngineCommand>,
    stop: Arc<StopState>,
}

impl Interpreter {
    /// Spawn the engine thread. Returns the handle plus the engine event
    /// stream (mount registrations).
    pub fn spawn(
        config: InterpreterConfig,
        reactive: ReactiveRegistry,
        targets: TargetRegistry,
    ) -> QuillResult<(Self, mpsc::UnboundedReceiver<EngineEvent>)> {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let stop = Arc::new(StopState::new());

        let thread_stop = stop.clone();
        std::thread::Builder::new()
            .name("quill-interpreter".to_string())
            .spawn(move || {
                engine::engine_thread(config, reactive, targets, event_tx, thread_stop, cmd_rx)
            })
            .map_err(|e| QuillError::interpreter(format!("cannot spawn engine thread: {e}")))?;

        Ok((
            Self {
                commands: cmd_tx,
                stop,
            },
            event_rx,
        ))
    }

    /// Begin a run. At most one run may be in progress; a second start is
    /// rejected with [`QuillError::RunInProgress`].
    pub async fn start_run(&self, options: RunOptions) -> QuillResult<RunHandle> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::BeginRun {
                options,
                events: event_tx,
                reply: reply_tx,
            })
            .await
            .map_err(|_| QuillError::SessionClosed)?;
        reply_rx.await.map_err(|_| QuillError::SessionClosed)??;
        Ok(RunHandle {
            commands: self.commands.clone(),
            events: event_rx,
        })
    }

    /// Abort the current run, if any. In-flight awaits reject with
    /// `Execution stopped`; calling this with no run in progress is a no-op.
    pub fn stop(&self) {
        self.stop.request_stop();
        let _ = self.commands.try_send(EngineCommand::Stop);
    }

    /// Resolve a pending mount result with an inbound submission value
    pub async fn resolve_mount(&self, mount_id: String, value: Value) -> QuillResult<()> {
        self.commands
            .send(EngineCommand::ResolveMount { mount_id, value })
            .await
            .map_err(|_| QuillError::SessionClosed)
    }

    /// Invoke a named mount callback inside the context. Exceptions are
    /// caught and logged on the engine side, never propagated.
    pub async fn invoke_callback(
        &self,
        mount_id: String,
        name: String,
        args: Vec<Value>,
    ) -> QuillResult<()> {
        self.commands
            .send(EngineCommand::InvokeCallback {
                mount_id,
                name,
                args,
            })
            .await
            .map_err(|_| QuillError::SessionClosed)
    }

    /// Tear the engine thread down
    pub fn shutdown(&self) {
        let _ = self.commands.try_send(EngineCommand::Shutdown);
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to one in-progress run
#[derive(Debug)]
pub struct RunHandle {
    commands: mpsc::Sender<EngineCommand>,
    events: mpsc::UnboundedReceiver<RunEvent>,
}

impl RunHandle {
    /// Feed a chunk of source text; statements execute as they complete
    pub async fn feed(&self, text: impl Into<String>) -> QuillResult<()> {
        self.commands
            .send(EngineCommand::Feed { text: text.into() })
            .await
            .map_err(|_| QuillError::SessionClosed)
    }

    /// Close the source stream; the run resolves once the tail executes
    pub async fn finish_source(&self) -> QuillResult<()> {
        self.commands
            .send(EngineCommand::FinishSource)
            .await
            .map_err(|_| QuillError::SessionClosed)
    }

    /// Next run event, `None` once the run has resolved and drained
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// Drain events to completion and return the final result
    pub async fn wait(mut self) -> RunResult {
        while let Some(event) = self.events.recv().await {
            if let RunEvent::Finished { logs, error } = event {
                return RunResult { logs, error };
            }
        }
        RunResult {
            logs: String::new(),
            error: Some("Session closed".to_string()),
        }
    }
}
