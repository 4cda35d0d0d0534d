//! Incremental fenced-markdown parser
//!
//! Segments a live model stream into prose, executable code fences
//! (` ```tsx agent.run `), and data fences (` ```json agent.data => "id" `)
//! without buffering to end of stream. The synchronous [`FenceScanner`] is
//! the state machine; [`segment_stream`] drives it over an async chunk
//! stream and hands out segments whose bodies are lazy sub-streams.

mod scanner;
mod segment;

pub use scanner::{BlockKind, FenceScanner, ScanEvent};
pub use segment::{
    collect_body, segment_stream, CodeSegment, DataSegment, ProseSegment, Segment,
};
