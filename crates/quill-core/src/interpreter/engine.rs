//! Engine thread: owns the QuickJS runtime and context
//!
//! The engine processes commands in arrival order. A run spans several
//! commands (begin, feeds, finish); inside a run, statement promises are
//! pumped to settlement on this thread, interleaving engine jobs, host
//! timers, and control commands (mount resolution, callback dispatch,
//! stop). The interrupt handler installed on the runtime observes the stop
//! flag and the run deadline, so runaway synchronous code is also bounded.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rquickjs::function::Func;
use rquickjs::{Context, Ctx, Function, Persistent, Promise, Runtime, Value as JsValue};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use super::bindings::{classify, StatementKind};
use super::statement::{is_blank_statement, StatementSplitter};
use super::{EngineEvent, InterpreterConfig, MountEvent, RunEvent, RunOptions};
use crate::error::{QuillError, QuillResult};
use crate::protocol::MountFramePayload;
use crate::reactive::{DocId, PathSeg, ReactiveRegistry};
use crate::targets::TargetRegistry;

const EXECUTION_STOPPED: &str = "Execution stopped";
const INCOMPLETE_STATEMENT: &str = "Incomplete statement";

/// Commands accepted by the engine thread
pub(super) enum EngineCommand {
    BeginRun {
        options: RunOptions,
        events: mpsc::UnboundedSender<RunEvent>,
        reply: oneshot::Sender<QuillResult<()>>,
    },
    Feed {
        text: String,
    },
    FinishSource,
    ResolveMount {
        mount_id: String,
        value: Value,
    },
    InvokeCallback {
        mount_id: String,
        name: String,
        args: Vec<Value>,
    },
    Stop,
    Shutdown,
}

/// Stop flag and run deadline shared with the engine's interrupt handler
pub(super) struct StopState {
    stopped: AtomicBool,
    deadline_ms: AtomicU64,
    timeout_ms: AtomicU64,
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl StopState {
    pub(super) fn new() -> Self {
        Self {
            stopped: AtomicBool::new(false),
            deadline_ms: AtomicU64::new(0),
            timeout_ms: AtomicU64::new(0),
        }
    }

    pub(super) fn request_stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    fn arm(&self, timeout: Duration) {
        self.stopped.store(false, Ordering::Relaxed);
        self.timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
        self.deadline_ms
            .store(epoch_ms() + timeout.as_millis() as u64, Ordering::Relaxed);
    }

    fn disarm(&self) {
        self.deadline_ms.store(0, Ordering::Relaxed);
    }

    fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout_ms.load(Ordering::Relaxed)
    }

    fn expired(&self) -> bool {
        let deadline = self.deadline_ms.load(Ordering::Relaxed);
        deadline != 0 && epoch_ms() > deadline
    }

    fn should_interrupt(&self) -> bool {
        self.stopped() || self.expired()
    }
}

struct TimerEntry {
    tid: u32,
    due: Instant,
    interval: Option<Duration>,
}

/// State reachable from the native host functions
struct HostState {
    /// Per-run console buffer, in emission order
    log: Vec<String>,
    timers: Vec<TimerEntry>,
    reactive: ReactiveRegistry,
    targets: TargetRegistry,
    events: mpsc::UnboundedSender<EngineEvent>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct MountSpec {
    #[serde(default)]
    ui_source: String,
    #[serde(default)]
    data_id: Option<String>,
    #[serde(default)]
    streamed_data_id: Option<String>,
    #[serde(default)]
    output_schema: Option<Value>,
    #[serde(default)]
    callback_names: Vec<String>,
}

impl HostState {
    fn console_write(&mut self, level: &str, text: &str) {
        tracing::trace!(target: "quill::console", level, text);
        self.log.push(format!("{text}\n"));
    }

    fn parse_path(path_json: &str) -> Vec<PathSeg> {
        serde_json::from_str(path_json).unwrap_or_default()
    }

    fn doc_new(&self, initial_json: &str) -> String {
        let initial: Value = serde_json::from_str(initial_json).unwrap_or(Value::Null);
        let initial = match initial {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        self.reactive.wrap(initial).to_string()
    }

    fn doc_get(&self, doc: &str, path_json: &str) -> String {
        let Some(id) = DocId::parse(doc) else {
            return String::new();
        };
        match self.reactive.get(id, &Self::parse_path(path_json)) {
            Some(value) => value.to_string(),
            None => String::new(),
        }
    }

    fn doc_set(&self, doc: &str, path_json: &str, value_json: &str) {
        let Some(id) = DocId::parse(doc) else { return };
        let Ok(value) = serde_json::from_str(value_json) else {
            return;
        };
        self.reactive.set(id, Self::parse_path(path_json), value);
    }

    fn doc_delete(&self, doc: &str, path_json: &str) {
        let Some(id) = DocId::parse(doc) else { return };
        self.reactive.delete(id, Self::parse_path(path_json));
    }

    fn doc_snapshot(&self, doc: &str) -> String {
        DocId::parse(doc)
            .and_then(|id| self.reactive.snapshot(id))
            .map(|v| v.to_string())
            .unwrap_or_default()
    }

    fn target_get(&self, id: &str, key: &str) -> String {
        self.targets
            .get(id, key)
            .map(|v| v.to_string())
            .unwrap_or_default()
    }

    fn target_snapshot(&self, id: &str) -> String {
        self.targets
            .snapshot(id)
            .map(|v| v.to_string())
            .unwrap_or_default()
    }

    fn register_mount(&mut self, spec_json: &str) -> String {
        let spec: MountSpec = match serde_json::from_str(spec_json) {
            Ok(spec) => spec,
            Err(e) => {
                tracing::warn!(error = %e, "malformed mount options");
                return String::new();
            }
        };
        let mount_id = format!("mnt_{}", uuid::Uuid::new_v4().simple());
        let doc = spec.data_id.as_deref().and_then(DocId::parse);
        let initial_data = doc.and_then(|d| self.reactive.snapshot(d));
        // Subscribe here, synchronously, so mutations made right after
        // mount() land on the channel instead of racing the session task.
        let patches = doc.and_then(|d| self.reactive.subscribe(d));

        let frame = MountFramePayload {
            mount_id: mount_id.clone(),
            ui_source: spec.ui_source,
            initial_data,
            streamed_data_id: spec.streamed_data_id,
            output_schema: spec.output_schema.unwrap_or_else(|| {
                Value::Object(Default::default())
            }),
            callback_names: (!spec.callback_names.is_empty()).then_some(spec.callback_names),
        };
        let _ = self
            .events
            .send(EngineEvent::Mount(MountEvent { frame, patches }));
        mount_id
    }

    fn arm_timer(&mut self, tid: u32, ms: f64, repeat: bool) {
        let delay = Duration::from_millis(ms.max(0.0) as u64);
        self.timers.push(TimerEntry {
            tid,
            due: Instant::now() + delay,
            interval: repeat.then_some(delay),
        });
    }

    fn disarm_timer(&mut self, tid: u32) {
        self.timers.retain(|t| t.tid != tid);
    }
}

struct ActiveRun {
    splitter: StatementSplitter,
    events: mpsc::UnboundedSender<RunEvent>,
    failed: Option<String>,
}

struct Engine {
    runtime: Runtime,
    context: Context,
    host: Rc<RefCell<HostState>>,
    stop: Arc<StopState>,
    commands: mpsc::Receiver<EngineCommand>,
    /// Commands deferred while a statement was being pumped
    pending: VecDeque<EngineCommand>,
    run: Option<ActiveRun>,
    shutdown: bool,
}

/// Thread entry point
pub(super) fn engine_thread(
    config: InterpreterConfig,
    reactive: ReactiveRegistry,
    targets: TargetRegistry,
    events: mpsc::UnboundedSender<EngineEvent>,
    stop: Arc<StopState>,
    commands: mpsc::Receiver<EngineCommand>,
) {
    let runtime = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "cannot create js runtime");
            return;
        }
    };
    let context = match Context::full(&runtime) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(error = %e, "cannot create js context");
            return;
        }
    };

    {
        let stop = stop.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || stop.should_interrupt())));
    }

    let host = Rc::new(RefCell::new(HostState {
        log: Vec::new(),
        timers: Vec::new(),
        reactive,
        targets,
        events,
    }));

    let installed = context.with(|ctx| install_host(&ctx, &host, &config));
    if let Err(e) = installed {
        tracing::error!(error = %e, "cannot install interpreter prelude");
        return;
    }

    let mut engine = Engine {
        runtime,
        context,
        host,
        stop,
        commands,
        pending: VecDeque::new(),
        run: None,
        shutdown: false,
    };
    engine.run_loop();
    tracing::debug!("interpreter thread exiting");
}

impl Engine {
    fn run_loop(&mut self) {
        loop {
            if self.shutdown {
                break;
            }
            let command = match self.pending.pop_front() {
                Some(command) => command,
                None => match self.commands.blocking_recv() {
                    Some(command) => command,
                    None => break,
                },
            };
            match command {
                EngineCommand::Shutdown => break,
                EngineCommand::BeginRun {
                    options,
                    events,
                    reply,
                } => self.handle_begin(options, events, reply),
                EngineCommand::Feed { text } => self.handle_feed(&text),
                EngineCommand::FinishSource => self.handle_finish_source(),
                EngineCommand::ResolveMount { mount_id, value } => {
                    self.resolve_mount(&mount_id, &value)
                }
                EngineCommand::InvokeCallback {
                    mount_id,
                    name,
                    args,
                } => self.invoke_callback(&mount_id, &name, &args),
                EngineCommand::Stop => self.handle_stop(),
            }
            self.drain_jobs();
            self.fire_due_timers();
        }
    }

    fn handle_begin(
        &mut self,
        options: RunOptions,
        events: mpsc::UnboundedSender<RunEvent>,
        reply: oneshot::Sender<QuillResult<()>>,
    ) {
        if self.run.is_some() {
            let _ = reply.send(Err(QuillError::RunInProgress));
            return;
        }
        self.stop.arm(options.timeout);
        self.host.borrow_mut().log.clear();
        self.run = Some(ActiveRun {
            splitter: StatementSplitter::new(),
            events,
            failed: None,
        });
        let _ = reply.send(Ok(()));
    }

    fn handle_feed(&mut self, text: &str) {
        for c in text.chars() {
            let trigger = match self.run.as_mut() {
                Some(run) if run.failed.is_none() => run.splitter.push_char(c),
                // After the first error (or with no run) remaining text is
                // discarded.
                _ => return,
            };
            if trigger {
                self.try_execute();
            }
        }
    }

    /// Probe the accumulated buffer; execute it when it compiles as a
    /// complete statement, otherwise keep accumulating.
    fn try_execute(&mut self) {
        let candidate = match self.run.as_ref() {
            Some(run) => run.splitter.buffer().to_string(),
            None => return,
        };
        if !self.probe(&candidate) {
            return;
        }
        if let Some(run) = self.run.as_mut() {
            run.splitter.take();
        }
        if is_blank_statement(&candidate) {
            return;
        }
        self.execute_statement(&candidate);
    }

    fn handle_finish_source(&mut self) {
        let (tail, already_failed) = match self.run.as_mut() {
            Some(run) => (run.splitter.take(), run.failed.is_some()),
            None => return,
        };
        if !already_failed && !is_blank_statement(&tail) {
            if self.probe(&tail) {
                self.execute_statement(&tail);
            } else if let Some(run) = self.run.as_mut() {
                run.failed = Some(INCOMPLETE_STATEMENT.to_string());
                let _ = run.events.send(RunEvent::Statement {
                    logs: String::new(),
                    error: Some(INCOMPLETE_STATEMENT.to_string()),
                });
            }
        }
        self.drain_jobs();
        if let Some(run) = self.run.take() {
            let logs = self.host.borrow().log.concat();
            let _ = run.events.send(RunEvent::Finished {
                logs,
                error: run.failed,
            });
        }
        self.stop.disarm();
    }

    fn handle_stop(&mut self) {
        self.stop.request_stop();
        if let Some(run) = self.run.as_mut() {
            if run.failed.is_none() {
                run.failed = Some(EXECUTION_STOPPED.to_string());
            }
        }
    }

    fn probe(&self, source: &str) -> bool {
        self.context.with(|ctx| {
            let probe: Function = match ctx.globals().get("__quill_probe") {
                Ok(f) => f,
                Err(_) => return false,
            };
            match probe.call::<_, bool>((source,)) {
                Ok(_) => true,
                Err(_) => {
                    let _ = ctx.catch();
                    false
                }
            }
        })
    }

    fn execute_statement(&mut self, stmt: &str) {
        let kind = classify(stmt);
        let mark = self.host.borrow().log.len();
        let error = self.run_wrapped(stmt, &kind).err();
        let delta = self.host.borrow().log[mark..].concat();
        if let Some(run) = self.run.as_mut() {
            if let Some(e) = &error {
                if run.failed.is_none() {
                    run.failed = Some(e.clone());
                }
            }
            let _ = run.events.send(RunEvent::Statement { logs: delta, error });
        }
    }

    /// Evaluate one wrapped statement and pump its promise to settlement,
    /// interleaving engine jobs, host timers, and control commands. On
    /// resolution, declared names are hoisted into the shared context.
    fn run_wrapped(&mut self, stmt: &str, kind: &StatementKind) -> Result<(), String> {
        let wrapped = wrap_statement(stmt, kind);
        let promise: Persistent<Promise<'static>> = self.context.with(|ctx| {
            match ctx.eval::<Promise, _>(wrapped) {
                Ok(p) => Ok(Persistent::save(&ctx, p)),
                Err(rquickjs::Error::Exception) => Err(format_caught(&ctx)),
                Err(e) => Err(e.to_string()),
            }
        })?;

        loop {
            let settled: Option<Result<(), String>> = self.context.with(|ctx| {
                let p = match promise.clone().restore(&ctx) {
                    Ok(p) => p,
                    Err(e) => return Some(Err(e.to_string())),
                };
                match p.finish::<JsValue>() {
                    Ok(value) => Some(hoist(&ctx, kind, value)),
                    Err(rquickjs::Error::WouldBlock) => None,
                    Err(rquickjs::Error::Exception) => Some(Err(format_caught(&ctx))),
                    Err(e) => Some(Err(e.to_string())),
                }
            });
            match settled {
                Some(Ok(())) => return Ok(()),
                Some(Err(message)) => return Err(self.stop_override(message)),
                None => {}
            }

            if self.stop.stopped() {
                return Err(EXECUTION_STOPPED.to_string());
            }
            if self.stop.expired() {
                return Err(format!("timed out after {}ms", self.stop.timeout_ms()));
            }

            let mut progressed = self.runtime.execute_pending_job().unwrap_or(true);
            progressed |= self.fire_due_timers();
            progressed |= self.service_commands();
            if !progressed {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    /// Replace an interrupt-shaped exception with the structured message
    fn stop_override(&self, message: String) -> String {
        if self.stop.stopped() {
            EXECUTION_STOPPED.to_string()
        } else if self.stop.expired() {
            format!("timed out after {}ms", self.stop.timeout_ms())
        } else {
            message
        }
    }

    /// Handle control commands that arrive while a statement is pumping.
    /// Source commands are deferred in order; mount resolution, callback
    /// dispatch, and stop act immediately.
    fn service_commands(&mut self) -> bool {
        let mut handled = false;
        loop {
            match self.commands.try_recv() {
                Ok(EngineCommand::ResolveMount { mount_id, value }) => {
                    self.resolve_mount(&mount_id, &value);
                    handled = true;
                }
                Ok(EngineCommand::InvokeCallback {
                    mount_id,
                    name,
                    args,
                }) => {
                    self.invoke_callback(&mount_id, &name, &args);
                    handled = true;
                }
                Ok(EngineCommand::Stop) => {
                    self.handle_stop();
                    handled = true;
                }
                Ok(EngineCommand::Shutdown) => {
                    self.shutdown = true;
                    self.stop.request_stop();
                    handled = true;
                }
                Ok(other) => self.pending.push_back(other),
                Err(_) => break,
            }
        }
        handled
    }

    fn resolve_mount(&mut self, mount_id: &str, value: &Value) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, mount_id, "unserializable submission value");
                return;
            }
        };
        let outcome = self.context.with(|ctx| {
            let resolve: Function = ctx.globals().get("__quill_resolve_mount")?;
            let resolved: bool = resolve.call((mount_id, json.as_str()))?;
            if !resolved {
                tracing::debug!(mount_id, "no pending result for mount");
            }
            Ok::<_, rquickjs::Error>(())
        });
        if let Err(e) = outcome {
            tracing::warn!(error = %e, mount_id, "mount resolution failed");
            self.clear_exception();
        }
    }

    fn invoke_callback(&mut self, mount_id: &str, name: &str, args: &[Value]) {
        let args_json = match serde_json::to_string(args) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, mount_id, name, "unserializable callback args");
                return;
            }
        };
        let outcome = self.context.with(|ctx| {
            let dispatch: Function = ctx.globals().get("__quill_dispatch_callback")?;
            dispatch.call::<_, String>((mount_id, name, args_json.as_str()))
        });
        match outcome {
            Ok(error) if error.is_empty() => {}
            Ok(error) => {
                tracing::warn!(mount_id, name, error = %error, "callback raised");
            }
            Err(e) => {
                tracing::warn!(error = %e, mount_id, name, "callback dispatch failed");
                self.clear_exception();
            }
        }
    }

    fn clear_exception(&self) {
        self.context.with(|ctx| {
            let _ = ctx.catch();
        });
    }

    fn drain_jobs(&self) {
        for _ in 0..10_000 {
            match self.runtime.execute_pending_job() {
                Ok(true) => {}
                Ok(false) => return,
                // A job threw; it was still consumed.
                Err(_) => {}
            }
        }
        tracing::warn!("engine job queue did not drain");
    }

    fn fire_due_timers(&mut self) -> bool {
        let now = Instant::now();
        let mut fired = Vec::new();
        {
            let mut host = self.host.borrow_mut();
            let timers = std::mem::take(&mut host.timers);
            for mut timer in timers {
                if timer.due <= now {
                    fired.push((timer.tid, timer.interval.is_some()));
                    if let Some(interval) = timer.interval {
                        timer.due = now + interval;
                        host.timers.push(timer);
                    }
                } else {
                    host.timers.push(timer);
                }
            }
        }
        for (tid, repeat) in &fired {
            let outcome = self.context.with(|ctx| {
                let fire: Function = ctx.globals().get("__quill_fire_timer")?;
                fire.call::<_, ()>((*tid, *repeat))
            });
            if let Err(e) = outcome {
                tracing::debug!(error = %e, tid, "timer callback raised");
                self.clear_exception();
            }
        }
        !fired.is_empty()
    }
}

/// Write a settled statement's declared names back into the shared context
fn hoist<'js>(ctx: &Ctx<'js>, kind: &StatementKind, value: JsValue<'js>) -> Result<(), String> {
    match kind {
        StatementKind::VarDecl { names } => {
            let Some(obj) = value.as_object() else {
                return Ok(());
            };
            for name in names {
                let bound: JsValue = obj.get(name.as_str()).map_err(|e| e.to_string())?;
                ctx.globals()
                    .set(name.as_str(), bound)
                    .map_err(|e| e.to_string())?;
            }
            Ok(())
        }
        StatementKind::FnDecl { name } => ctx
            .globals()
            .set(name.as_str(), value)
            .map_err(|e| e.to_string()),
        StatementKind::Other => Ok(()),
    }
}

/// Wrap one statement in an async IIFE so `await` is legal and declared
/// names can be returned for hoisting.
fn wrap_statement(stmt: &str, kind: &StatementKind) -> String {
    match kind {
        StatementKind::VarDecl { names } => format!(
            "(async () => {{\n{stmt}\nreturn {{ {} }};\n}})()",
            names.join(", ")
        ),
        StatementKind::FnDecl { name } => {
            format!("(async () => {{\n{stmt}\nreturn {name};\n}})()")
        }
        StatementKind::Other => format!("(async () => {{\n{stmt}\n}})()"),
    }
}

/// Reduce a thrown value to `error.message` when available, else `String(e)`
fn format_caught(ctx: &Ctx<'_>) -> String {
    let caught = ctx.catch();
    if let Some(obj) = caught.as_object() {
        if let Ok(Some(message)) = obj.get::<_, Option<String>>("message") {
            if !message.is_empty() {
                return message;
            }
        }
    }
    ctx.globals()
        .get::<_, Function>("String")
        .ok()
        .and_then(|f| f.call::<_, String>((caught,)).ok())
        .unwrap_or_else(|| "unknown error".to_string())
}

/// Register native host functions and evaluate the JS prelude
fn install_host(
    ctx: &Ctx<'_>,
    host: &Rc<RefCell<HostState>>,
    config: &InterpreterConfig,
) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    {
        let host = Rc::clone(host);
        globals.set(
            "__quill_console_write",
            Func::from(move |level: String, text: String| {
                host.borrow_mut().console_write(&level, &text);
            }),
        )?;
    }
    {
        let host = Rc::clone(host);
        globals.set(
            "__quill_doc_new",
            Func::from(move |initial: String| host.borrow().doc_new(&initial)),
        )?;
    }
    {
        let host = Rc::clone(host);
        globals.set(
            "__quill_doc_get",
            Func::from(move |doc: String, path: String| host.borrow().doc_get(&doc, &path)),
        )?;
    }
    {
        let host = Rc::clone(host);
        globals.set(
            "__quill_doc_set",
            Func::from(move |doc: String, path: String, value: String| {
                host.borrow().doc_set(&doc, &path, &value);
            }),
        )?;
    }
    {
        let host = Rc::clone(host);
        globals.set(
            "__quill_doc_delete",
            Func::from(move |doc: String, path: String| {
                host.borrow().doc_delete(&doc, &path);
            }),
        )?;
    }
    {
        let host = Rc::clone(host);
        globals.set(
            "__quill_doc_snapshot",
            Func::from(move |doc: String| host.borrow().doc_snapshot(&doc)),
        )?;
    }
    {
        let host = Rc::clone(host);
        globals.set(
            "__quill_target_open",
            Func::from(move |id: String| host.borrow().targets.open(&id)),
        )?;
    }
    {
        let host = Rc::clone(host);
        globals.set(
            "__quill_target_get",
            Func::from(move |id: String, key: String| host.borrow().target_get(&id, &key)),
        )?;
    }
    {
        let host = Rc::clone(host);
        globals.set(
            "__quill_target_snapshot",
            Func::from(move |id: String| host.borrow().target_snapshot(&id)),
        )?;
    }
    {
        let host = Rc::clone(host);
        globals.set(
            "__quill_mount_register",
            Func::from(move |spec: String| host.borrow_mut().register_mount(&spec)),
        )?;
    }
    {
        let host = Rc::clone(host);
        globals.set(
            "__quill_timer_arm",
            Func::from(move |tid: u32, ms: f64, repeat: bool| {
                host.borrow_mut().arm_timer(tid, ms, repeat);
            }),
        )?;
    }
    {
        let host = Rc::clone(host);
        globals.set(
            "__quill_timer_disarm",
            Func::from(move |tid: u32| host.borrow_mut().disarm_timer(tid)),
        )?;
    }

    ctx.eval::<(), _>(PRELUDE)?;

    for (name, value) in &config.globals {
        let json = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
        let js = ctx.json_parse(json)?;
        globals.set(name.as_str(), js)?;
    }

    Ok(())
}

/// JS glue evaluated once per context: console capture, the `Data`,
/// `StreamedData` and `mount` globals, host-backed timers, and the
/// statement completeness probe.
const PRELUDE: &str = r#"
(() => {
  "use strict";
  const write = __quill_console_write;
  const fmt = (v) => {
    if (typeof v === "string") return v;
    if (v === undefined) return "undefined";
    if (v instanceof Error) return v.message ? v.message : String(v);
    if (typeof v === "function" || typeof v === "symbol") return String(v);
    try {
      const s = JSON.stringify(v);
      if (s !== undefined) return s;
    } catch (_) {}
    return String(v);
  };
  const joined = (args) => args.map(fmt).join(" ");
  globalThis.console = {
    log: (...a) => write("log", joined(a)),
    info: (...a) => write("info", joined(a)),
    warn: (...a) => write("warn", joined(a)),
    error: (...a) => write("error", joined(a)),
    debug: (...a) => write("debug", joined(a)),
  };

  const parse = (s) => (s === "" ? undefined : JSON.parse(s));
  const toPath = (p) => (Array.isArray(p) ? p : [p]);

  globalThis.Data = (initial) => {
    const id = __quill_doc_new(JSON.stringify(initial === undefined ? {} : initial));
    const handle = {
      get: (path) => parse(__quill_doc_get(id, JSON.stringify(toPath(path)))),
      set: (path, value) => {
        __quill_doc_set(
          id,
          JSON.stringify(toPath(path)),
          JSON.stringify(value === undefined ? null : value),
        );
        return handle;
      },
      delete: (path) => {
        __quill_doc_delete(id, JSON.stringify(toPath(path)));
        return handle;
      },
      snapshot: () => parse(__quill_doc_snapshot(id)),
    };
    Object.defineProperty(handle, "__quillDoc", { value: id, enumerable: false });
    return handle;
  };

  globalThis.StreamedData = (id) => {
    const key = String(id);
    __quill_target_open(key);
    const handle = {
      get: (prop) => parse(__quill_target_get(key, String(prop))),
      snapshot: () => parse(__quill_target_snapshot(key)),
    };
    Object.defineProperty(handle, "__quillTarget", { value: key, enumerable: false });
    return handle;
  };

  const callbacks = Object.create(null);
  const pendingResults = Object.create(null);

  globalThis.mount = (options = {}) => {
    const spec = {
      uiSource: options.ui !== undefined ? String(options.ui) : "",
      dataId: options.data && options.data.__quillDoc ? options.data.__quillDoc : null,
      streamedDataId:
        options.streamedData && options.streamedData.__quillTarget
          ? options.streamedData.__quillTarget
          : null,
      outputSchema: options.outputSchema === undefined ? null : options.outputSchema,
      callbackNames: options.callbacks ? Object.keys(options.callbacks) : [],
    };
    const id = __quill_mount_register(JSON.stringify(spec));
    if (options.callbacks) callbacks[id] = options.callbacks;
    let resolve;
    const result = new Promise((res) => {
      resolve = res;
    });
    pendingResults[id] = resolve;
    return { id, result };
  };

  globalThis.__quill_resolve_mount = (id, json) => {
    const resolve = pendingResults[id];
    if (!resolve) return false;
    delete pendingResults[id];
    resolve(JSON.parse(json));
    return true;
  };

  globalThis.__quill_dispatch_callback = (id, name, json) => {
    const table = callbacks[id];
    const fn = table && table[name];
    if (typeof fn !== "function") return "no such callback: " + name;
    try {
      fn(...JSON.parse(json));
      return "";
    } catch (err) {
      return err && err.message ? err.message : String(err);
    }
  };

  const timers = Object.create(null);
  let timerSeq = 1;
  globalThis.setTimeout = (fn, ms, ...args) => {
    const tid = timerSeq++;
    timers[tid] = () => fn(...args);
    __quill_timer_arm(tid, Number(ms) || 0, false);
    return tid;
  };
  globalThis.setInterval = (fn, ms, ...args) => {
    const tid = timerSeq++;
    timers[tid] = () => fn(...args);
    __quill_timer_arm(tid, Number(ms) || 0, true);
    return tid;
  };
  globalThis.clearTimeout = (tid) => {
    delete timers[tid];
    __quill_timer_disarm(Number(tid) || 0);
  };
  globalThis.clearInterval = globalThis.clearTimeout;
  globalThis.__quill_fire_timer = (tid, repeat) => {
    const fn = timers[tid];
    if (!fn) return;
    if (!repeat) delete timers[tid];
    fn();
  };
  globalThis.queueMicrotask = (fn) => {
    Promise.resolve().then(fn);
  };

  const AsyncFunction = (async () => {}).constructor;
  globalThis.__quill_probe = (src) => {
    new AsyncFunction(src);
    return true;
  };
})();
"#;
