//! Session lifecycle
//!
//! One session per connected client. A session owns exactly one persistent
//! interpreter context, one reactive-state registry, one streamed-target
//! registry, one mount registry, and the model with its bounded history.
//! At most one interaction is in flight; a second start is rejected.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::error::QuillResult;
use crate::interaction;
use crate::interpreter::{EngineEvent, Interpreter, InterpreterConfig};
use crate::llm::ChatModel;
use crate::mounts::MountManager;
use crate::protocol::{
    CallbackInvokePayload, ClientLogPayload, LogLevel, LogLinePayload, Outbound, SessionPayload,
    UiSubmitPayload, UserMessagePayload,
};
use crate::reactive::ReactiveRegistry;
use crate::targets::TargetRegistry;

/// One client's runtime state; see the module docs
pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    pub(crate) config: RuntimeConfig,
    pub(crate) interpreter: Interpreter,
    reactive: ReactiveRegistry,
    pub(crate) targets: TargetRegistry,
    mounts: Arc<Mutex<MountManager>>,
    pub(crate) model: tokio::sync::Mutex<Box<dyn ChatModel>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    interaction_active: AtomicBool,
    cancel: CancellationToken,
}

impl Session {
    /// Create a session. `globals` are the skill globals injected into the
    /// interpreter context. Returns the session plus the outbound frame
    /// stream the transport must pump to the client.
    pub fn new(
        config: RuntimeConfig,
        model: Box<dyn ChatModel>,
        globals: HashMap<String, Value>,
    ) -> QuillResult<(Arc<Self>, mpsc::UnboundedReceiver<Outbound>)> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let reactive = ReactiveRegistry::new();
        let targets = TargetRegistry::new();
        let (interpreter, mut engine_events) = Interpreter::spawn(
            InterpreterConfig { globals },
            reactive.clone(),
            targets.clone(),
        )?;

        let mounts = Arc::new(Mutex::new(MountManager::new()));
        {
            // Mount registrations cross from the engine thread; register
            // them and start patch forwarding on the session side.
            let mounts = mounts.clone();
            let outbound = outbound.clone();
            tokio::spawn(async move {
                while let Some(event) = engine_events.recv().await {
                    match event {
                        EngineEvent::Mount(mount) => {
                            mounts.lock().register(mount, outbound.clone());
                        }
                    }
                }
            });
        }

        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            config,
            interpreter,
            reactive,
            targets,
            mounts,
            model: tokio::sync::Mutex::new(model),
            outbound,
            interaction_active: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });
        tracing::info!(session = %session.id, "session created");
        Ok((session, outbound_rx))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn reactive(&self) -> &ReactiveRegistry {
        &self.reactive
    }

    pub fn targets(&self) -> &TargetRegistry {
        &self.targets
    }

    /// The greeting frame sent on connect
    pub fn hello(&self) -> Outbound {
        Outbound::Session(SessionPayload {
            id: self.id.to_string(),
            created_at: self.created_at,
            schema_version: Some(1),
            capabilities: Some(vec![
                "markdown".to_string(),
                "mounts".to_string(),
                "streamed_data".to_string(),
            ]),
        })
    }

    /// Run one interaction to completion. Rejects a concurrent start with
    /// [`crate::QuillError::InteractionActive`].
    pub async fn interact(self: &Arc<Self>, text: &str) -> QuillResult<()> {
        self.begin_interaction()?;
        let interaction_id = Uuid::new_v4().to_string();
        interaction::drive_interaction(self, &interaction_id, text).await;
        self.interaction_active.store(false, Ordering::Release);
        Ok(())
    }

    /// Start an interaction for a user message. A second start while one is
    /// active is rejected; the frame is dropped with a warning.
    pub fn handle_user_message(self: &Arc<Self>, payload: UserMessagePayload) {
        if self.cancelled() {
            return;
        }
        if self.begin_interaction().is_err() {
            tracing::warn!(session = %self.id, "interaction already active; message dropped");
            self.send(Outbound::LogLine(LogLinePayload {
                t: Some(Utc::now()),
                lvl: LogLevel::Warn,
                msg: Some("an interaction is already in progress".to_string()),
                ..Default::default()
            }));
            return;
        }

        let interaction_id = payload
            .interaction_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let session = Arc::clone(self);
        tokio::spawn(async move {
            interaction::drive_interaction(&session, &interaction_id, &payload.text).await;
            session.interaction_active.store(false, Ordering::Release);
        });
    }

    fn begin_interaction(&self) -> QuillResult<()> {
        self.interaction_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| crate::QuillError::InteractionActive)?;
        Ok(())
    }

    /// Fulfil a mount's pending result with the submitted value
    pub async fn handle_ui_submit(&self, payload: UiSubmitPayload) {
        if self.cancelled() {
            return;
        }
        let pending = self.mounts.lock().take_pending(&payload.mount_id);
        if !pending {
            tracing::warn!(mount_id = %payload.mount_id, code = "unknown_ui_submit", "submission without a pending mount");
            self.send(Outbound::log_code(
                LogLevel::Warn,
                "unknown_ui_submit",
                format!("no pending result for mount {}", payload.mount_id),
            ));
            return;
        }
        let _ = self
            .interpreter
            .resolve_mount(payload.mount_id, payload.value)
            .await;
    }

    /// Dispatch a named mount callback
    pub async fn handle_callback_invoke(&self, payload: CallbackInvokePayload) {
        if self.cancelled() {
            return;
        }
        let known = self
            .mounts
            .lock()
            .has_callback(&payload.mount_id, &payload.name);
        if !known {
            tracing::warn!(mount_id = %payload.mount_id, name = %payload.name, "unknown callback");
            return;
        }
        let _ = self
            .interpreter
            .invoke_callback(payload.mount_id, payload.name, payload.args)
            .await;
    }

    /// Surface a protocol rejection on the client's operator channel. The
    /// offending frame was dropped; the session carries on untouched.
    pub fn notify_rejection(&self, rejection: &crate::protocol::Rejection) {
        self.send(Outbound::log_code(
            LogLevel::Warn,
            rejection.code,
            rejection.detail.clone(),
        ));
    }

    /// Mirror a client-side log line into the operator log
    pub fn handle_client_log(&self, payload: ClientLogPayload) {
        let msg = payload.msg.as_deref().unwrap_or("");
        match payload.lvl {
            LogLevel::Debug => {
                tracing::debug!(src = "client", data = ?payload.data, "{msg}")
            }
            LogLevel::Info => tracing::info!(src = "client", data = ?payload.data, "{msg}"),
            LogLevel::Warn => tracing::warn!(src = "client", data = ?payload.data, "{msg}"),
            LogLevel::Error => {
                tracing::error!(src = "client", data = ?payload.data, "{msg}")
            }
        }
    }

    /// Stop the session: ends the interaction loop at the next boundary,
    /// aborts the in-flight run, and clears pending mount waiters (they
    /// never resolve). Frames arriving after stop are ignored.
    pub fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        tracing::info!(session = %self.id, code = "session_closed", "session stopping");
        self.cancel.cancel();
        self.interpreter.stop();
        self.mounts.lock().clear_pending();
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn send(&self, frame: Outbound) {
        let _ = self.outbound.send(frame);
    }

    pub(crate) fn outbound_sender(&self) -> mpsc::UnboundedSender<Outbound> {
        self.outbound.clone()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.interpreter.shutdown();
    }
}
