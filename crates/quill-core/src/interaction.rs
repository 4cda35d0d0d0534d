//! Interaction loop
//!
//! Drives one user-initiated exchange: obtain a model stream, parse it into
//! segments, dispatch each segment (prose outbound, code to the
//! interpreter, data to a streamed target), collect the turn's transcript,
//! and loop while the transcript is non-empty, bounded by the turn cap.
//!
//! Ordering within a turn: outbound frames follow segment order, code runs
//! never overlap, and turn k+1 starts only after turn k's last run
//! resolved. Code executes concurrently with the parsing of later prose
//! and data; its result is merged when the next code segment starts (or
//! when the turn's stream ends), and a failed block stops the remaining
//! blocks of the turn.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::interpreter::{RunEvent, RunHandle, RunOptions, RunResult};
use crate::llm::TextStream;
use crate::parser::{self, DataSegment, Segment};
use crate::protocol::{
    AssistantMessagePayload, BlockSummary, LogLevel, LogLinePayload, MarkdownChunkPayload,
    Outbound, StreamedDataChunkPayload, StreamedDataResetPayload, TracePayload,
};
use crate::session::Session;

/// Captured output of one model turn: trimmed logs and error, each absent
/// when empty. A turn continues the loop iff either field is present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    pub logs: Option<String>,
    pub error: Option<String>,
}

impl Transcript {
    /// Trim both fields and map empty strings to absent
    pub fn normalize(logs: &str, error: Option<&str>) -> Self {
        let logs = logs.trim();
        let error = error.map(str::trim).unwrap_or("");
        Self {
            logs: (!logs.is_empty()).then(|| logs.to_string()),
            error: (!error.is_empty()).then(|| error.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_none() && self.error.is_none()
    }

    /// Text fed back to the model as the next turn's input
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(logs) = &self.logs {
            out.push_str("Console output:\n");
            out.push_str(logs);
            out.push('\n');
        }
        if let Some(error) = &self.error {
            out.push_str("Execution error:\n");
            out.push_str(error);
            out.push('\n');
        }
        out
    }
}

/// Run one interaction to completion or to the turn cap
pub(crate) async fn drive_interaction(session: &Arc<Session>, interaction_id: &str, text: &str) {
    tracing::info!(interaction = interaction_id, "interaction started");
    let max_turns = session.config.max_turns;
    let mut transcript = Transcript::default();
    let mut turn: u32 = 0;

    loop {
        if session.cancelled() {
            break;
        }

        let stream = {
            let mut model = session.model.lock().await;
            let result = if turn == 0 {
                model.stream_opening(text).await
            } else {
                model.stream_continuation(&transcript).await
            };
            match result {
                Ok(stream) => stream,
                Err(e) => {
                    // The model rolled its history back; surface and end.
                    tracing::error!(interaction = interaction_id, error = %e, "model turn failed");
                    session.send(Outbound::LogLine(LogLinePayload {
                        t: Some(chrono::Utc::now()),
                        lvl: LogLevel::Error,
                        msg: Some(format!("model turn failed: {e}")),
                        ..Default::default()
                    }));
                    break;
                }
            }
        };

        transcript = run_turn(session, interaction_id, stream).await;
        turn += 1;

        if transcript.is_empty() || turn >= max_turns || session.cancelled() {
            break;
        }
    }
    tracing::info!(interaction = interaction_id, turns = turn, "interaction finished");
}

/// Parse one model stream and dispatch its segments; returns the turn's
/// normalized transcript.
async fn run_turn(session: &Arc<Session>, interaction_id: &str, stream: TextStream) -> Transcript {
    let (mut segments, feeder) = parser::segment_stream(stream);
    let message_id = Uuid::new_v4().to_string();

    let mut markdown = String::new();
    let mut blocks: Vec<BlockSummary> = Vec::new();
    let mut logs = String::new();
    let mut error: Option<String> = None;
    let mut pending_run: Option<JoinHandle<RunResult>> = None;

    while let Some(segment) = segments.recv().await {
        if session.cancelled() {
            break;
        }
        match segment {
            Segment::Prose(prose) => {
                // Fresh message identity per prose segment.
                let prose_message_id = Uuid::new_v4().to_string();
                let mut body = prose.body;
                while let Some(token) = body.recv().await {
                    markdown.push_str(&token);
                    session.send(Outbound::MarkdownChunk(MarkdownChunkPayload {
                        interaction_id: interaction_id.to_string(),
                        message_id: prose_message_id.clone(),
                        text: token,
                    }));
                }
            }
            Segment::Data(data) => {
                blocks.push(BlockSummary {
                    index: data.index,
                    kind: "data".to_string(),
                    target: Some(data.target.clone()),
                });
                // Settle the in-flight run when it already finished, or
                // when the target is still unregistered and the statement
                // registering it may not have executed yet. A failed block
                // stops the remaining blocks of the turn.
                let must_settle = pending_run.as_ref().is_some_and(|h| h.is_finished())
                    || (pending_run.is_some() && !session.targets.contains(&data.target));
                if must_settle {
                    if let Some(handle) = pending_run.take() {
                        merge_run(handle.await.ok(), &mut logs, &mut error);
                    }
                }
                if error.is_some() {
                    drain(data.body).await;
                    continue;
                }
                dispatch_data(session, data).await;
            }
            Segment::Code(code) => {
                blocks.push(BlockSummary {
                    index: code.index,
                    kind: "code".to_string(),
                    target: None,
                });
                // Earlier outbound writes are already ordered ahead of any
                // frame this block will produce; await the prior run so
                // executions never overlap.
                if let Some(handle) = pending_run.take() {
                    merge_run(handle.await.ok(), &mut logs, &mut error);
                }
                if error.is_some() {
                    drain(code.body).await;
                    continue;
                }

                let options = RunOptions {
                    timeout: session.config.run_timeout(),
                };
                match session.interpreter.start_run(options).await {
                    Ok(run) => {
                        let mut body = code.body;
                        while let Some(token) = body.recv().await {
                            if run.feed(token).await.is_err() {
                                break;
                            }
                        }
                        let _ = run.finish_source().await;
                        pending_run = Some(spawn_collector(
                            session.outbound_sender(),
                            run,
                            interaction_id.to_string(),
                            message_id.clone(),
                            code.index,
                        ));
                    }
                    Err(e) => {
                        tracing::error!(code = "block_failed", block = code.index, error = %e, "cannot start run");
                        session.send(Outbound::LogLine(LogLinePayload {
                            t: Some(chrono::Utc::now()),
                            lvl: LogLevel::Error,
                            msg: Some(format!("cannot start run: {e}")),
                            code: Some("block_failed".to_string()),
                            block_index: Some(code.index),
                            ..Default::default()
                        }));
                        error = Some(e.to_string());
                        drain(code.body).await;
                    }
                }
            }
        }
    }

    let provider_failure = feeder.await.ok().flatten();
    if let Some(handle) = pending_run.take() {
        merge_run(handle.await.ok(), &mut logs, &mut error);
    }
    if let Some(failure) = provider_failure {
        tracing::error!(interaction = interaction_id, error = %failure, "model stream failed");
        if error.is_none() {
            error = Some(failure.to_string());
        }
    }

    session.send(Outbound::AssistantMessage(AssistantMessagePayload {
        interaction_id: interaction_id.to_string(),
        message_id,
        markdown,
        blocks,
    }));

    Transcript::normalize(&logs, error.as_deref())
}

fn merge_run(result: Option<RunResult>, logs: &mut String, error: &mut Option<String>) {
    let Some(result) = result else { return };
    logs.push_str(&result.logs);
    if error.is_none() {
        *error = result.error;
    }
}

/// Tee a data fence body into its streamed target and the outbound channel
async fn dispatch_data(session: &Arc<Session>, data: DataSegment) {
    if !session.targets.contains(&data.target) {
        tracing::error!(code = "unknown_target", target = %data.target, block = data.index, "data fence for unregistered target");
        session.send(Outbound::log_code(
            LogLevel::Error,
            "unknown_target",
            format!("no streamed target named {}", data.target),
        ));
        drain(data.body).await;
        return;
    }

    session.targets.begin_stream(&data.target);
    session.send(Outbound::StreamedDataReset(StreamedDataResetPayload {
        streamed_data_id: data.target.clone(),
    }));

    let mut body = data.body;
    while let Some(chunk) = body.recv().await {
        session.targets.append_chunk(&data.target, &chunk);
        session.send(Outbound::StreamedDataChunk(StreamedDataChunkPayload {
            streamed_data_id: data.target.clone(),
            chunk,
        }));
    }

    if let Err(e) = session.targets.commit(&data.target) {
        tracing::warn!(code = "json_error", target = %data.target, error = %e, "data fence body did not parse");
        session.send(Outbound::log_code(
            LogLevel::Warn,
            "json_error",
            format!("target {}: {e}", data.target),
        ));
    }
}

/// Consume a run's statement events (forwarding console deltas and errors
/// as trace frames) and yield the final result.
fn spawn_collector(
    outbound: mpsc::UnboundedSender<Outbound>,
    mut run: RunHandle,
    interaction_id: String,
    message_id: String,
    block_index: u32,
) -> JoinHandle<RunResult> {
    tokio::spawn(async move {
        loop {
            match run.next_event().await {
                Some(RunEvent::Statement { logs, error }) => {
                    if !logs.is_empty() {
                        let _ = outbound.send(Outbound::Trace(TracePayload {
                            interaction_id: interaction_id.clone(),
                            message_id: message_id.clone(),
                            text: logs,
                            category: "console".to_string(),
                        }));
                    }
                    if let Some(e) = error {
                        let code = if e.starts_with("timed out after") {
                            "run_timeout"
                        } else {
                            "block_failed"
                        };
                        tracing::warn!(code, block = block_index, error = %e, "statement failed");
                        let _ = outbound.send(Outbound::Trace(TracePayload {
                            interaction_id: interaction_id.clone(),
                            message_id: message_id.clone(),
                            text: e,
                            category: "error".to_string(),
                        }));
                    }
                }
                Some(RunEvent::Finished { logs, error }) => {
                    return RunResult { logs, error };
                }
                None => {
                    return RunResult {
                        logs: String::new(),
                        error: Some("Session closed".to_string()),
                    }
                }
            }
        }
    })
}

async fn drain(mut body: mpsc::UnboundedReceiver<String>) {
    while body.recv().await.is_some() {}
}
