//! Segment stream driver
//!
//! Turns a chunk stream into an ordered stream of [`Segment`]s whose bodies
//! are lazy sub-streams. Body channels must be consumed (or dropped) by the
//! caller; the driver never waits on them, so segment order always matches
//! stream order.

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::scanner::{BlockKind, FenceScanner, ScanEvent};
use crate::error::QuillError;

/// A prose segment; the body yields text tokens as they arrive
#[derive(Debug)]
pub struct ProseSegment {
    pub body: mpsc::UnboundedReceiver<String>,
}

/// A code segment with its block index
#[derive(Debug)]
pub struct CodeSegment {
    pub index: u32,
    pub body: mpsc::UnboundedReceiver<String>,
}

/// A data segment with its block index and target identifier
#[derive(Debug)]
pub struct DataSegment {
    pub index: u32,
    pub target: String,
    pub body: mpsc::UnboundedReceiver<String>,
}

/// The parser's unit of output
#[derive(Debug)]
pub enum Segment {
    Prose(ProseSegment),
    Code(CodeSegment),
    Data(DataSegment),
}

struct Emitter {
    segments: mpsc::UnboundedSender<Segment>,
    body: Option<mpsc::UnboundedSender<String>>,
    body_is_prose: bool,
}

impl Emitter {
    fn on_event(&mut self, event: ScanEvent) {
        match event {
            ScanEvent::Prose(text) => {
                if self.body.is_none() || !self.body_is_prose {
                    let (tx, rx) = mpsc::unbounded_channel();
                    let _ = self
                        .segments
                        .send(Segment::Prose(ProseSegment { body: rx }));
                    self.body = Some(tx);
                    self.body_is_prose = true;
                }
                if let Some(tx) = &self.body {
                    let _ = tx.send(text);
                }
            }
            ScanEvent::BlockStart {
                kind,
                index,
                target,
            } => {
                let (tx, rx) = mpsc::unbounded_channel();
                let segment = match kind {
                    BlockKind::Code => Segment::Code(CodeSegment { index, body: rx }),
                    BlockKind::Data => Segment::Data(DataSegment {
                        index,
                        target: target.unwrap_or_default(),
                        body: rx,
                    }),
                };
                let _ = self.segments.send(segment);
                self.body = Some(tx);
                self.body_is_prose = false;
            }
            ScanEvent::BlockToken(text) => {
                if let Some(tx) = &self.body {
                    let _ = tx.send(text);
                }
            }
            ScanEvent::BlockEnd => {
                self.body = None;
            }
        }
    }
}

/// Spawn the parse task over a chunk stream. The join handle yields the
/// stream's failure, if it ended with one, after all parsed segments have
/// been emitted.
pub fn segment_stream<S>(
    chunks: S,
) -> (
    mpsc::UnboundedReceiver<Segment>,
    JoinHandle<Option<QuillError>>,
)
where
    S: Stream<Item = Result<String, QuillError>> + Send + 'static,
{
    let (seg_tx, seg_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let mut emitter = Emitter {
            segments: seg_tx,
            body: None,
            body_is_prose: false,
        };
        let mut scanner = FenceScanner::new();
        let mut failure = None;

        let mut chunks = std::pin::pin!(chunks);
        while let Some(item) = chunks.next().await {
            match item {
                Ok(chunk) => {
                    for event in scanner.feed(&chunk) {
                        emitter.on_event(event);
                    }
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        for event in scanner.finish() {
            emitter.on_event(event);
        }
        failure
    });
    (seg_rx, handle)
}

/// Drain a body sub-stream into one string; used by tests and by dispatch
/// paths that need the whole body
pub async fn collect_body(mut body: mpsc::UnboundedReceiver<String>) -> String {
    let mut out = String::new();
    while let Some(token) = body.recv().await {
        out.push_str(&token);
    }
    out
}
