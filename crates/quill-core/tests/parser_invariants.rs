//! Parser invariants checked across arbitrary chunkings
//!
//! The scanner must produce the same segmentation no matter how the input
//! text is split into chunks, reconstruct prose byte-for-byte, number code
//! and data blocks with one shared counter, and close every code block
//! with a trailing semicolon.

use quill_core::parser::{BlockKind, FenceScanner, ScanEvent};

/// Run the scanner over the input split into `size`-char chunks
fn scan_with_chunk_size(input: &str, size: usize) -> Vec<ScanEvent> {
    let mut scanner = FenceScanner::new();
    let mut events = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    for chunk in chars.chunks(size) {
        let chunk: String = chunk.iter().collect();
        events.extend(scanner.feed(&chunk));
    }
    events.extend(scanner.finish());
    collapse(events)
}

/// Merge adjacent text runs so chunking granularity does not affect
/// comparison
fn collapse(events: Vec<ScanEvent>) -> Vec<ScanEvent> {
    let mut out: Vec<ScanEvent> = Vec::new();
    for event in events {
        match (out.last_mut(), event) {
            (Some(ScanEvent::Prose(acc)), ScanEvent::Prose(t)) => acc.push_str(&t),
            (Some(ScanEvent::BlockToken(acc)), ScanEvent::BlockToken(t)) => acc.push_str(&t),
            (_, event) => out.push(event),
        }
    }
    out
}

const CORPUS: &[&str] = &[
    "Hi",
    "plain prose with `inline` and ``double`` ticks",
    "```tsx agent.run\nconsole.log(1+1);\n```\n",
    "A\n```tsx agent.run\nconsole.log('x');\n```\nZ",
    "```json agent.data => \"chart\"\n{\"points\": [1, 2, 3]}\n```",
    "```json agent.data => 'q'\n{}\n```tail",
    "before\n```python\nprint('passthrough')\n```\nafter",
    "```tsx agent.run\n1;``````json agent.data => \"t\"\n{}```",
    "one\n```tsx agent.run\nconst a = 1;\n```\n \t\n```tsx agent.run\nconsole.log(a);\n```\nend",
    "unterminated ```tsx agent.run\nconsole.log(1)",
    "unterminated header ```tsx agent.ru",
    "data with ticks in body ```json agent.data => \"x\"\n{\"s\": \"a`b\"}\n```",
    "unicode prosé ✨ ```tsx agent.run\nconsole.log('héllo');\n``` done",
];

#[test]
fn chunk_invariance_across_sizes() {
    for input in CORPUS {
        let reference = scan_with_chunk_size(input, usize::MAX);
        for size in [1, 2, 3, 5, 7, 11] {
            assert_eq!(
                scan_with_chunk_size(input, size),
                reference,
                "input {input:?} differs at chunk size {size}"
            );
        }
    }
}

#[test]
fn prose_reconstructibility() {
    // For inputs without recognized fences, the prose output is the input.
    for input in [
        "Hi",
        "plain prose with `inline` and ``double`` ticks",
        "before\n```python\nprint('passthrough')\n```\nafter",
        "unterminated header ```tsx agent.ru",
    ] {
        let prose: String = scan_with_chunk_size(input, 3)
            .into_iter()
            .filter_map(|e| match e {
                ScanEvent::Prose(t) => Some(t),
                _ => None,
            })
            .collect();
        assert_eq!(prose, *input);
    }
}

#[test]
fn block_indices_are_monotonic_from_zero() {
    for input in CORPUS {
        let indices: Vec<u32> = scan_with_chunk_size(input, 4)
            .into_iter()
            .filter_map(|e| match e {
                ScanEvent::BlockStart { index, .. } => Some(index),
                _ => None,
            })
            .collect();
        let expected: Vec<u32> = (0..indices.len() as u32).collect();
        assert_eq!(indices, expected, "input {input:?}");
    }
}

#[test]
fn code_bodies_end_with_semicolon() {
    for input in CORPUS {
        let events = scan_with_chunk_size(input, 2);
        let mut in_code = false;
        let mut body = String::new();
        for event in events {
            match event {
                ScanEvent::BlockStart { kind, .. } => {
                    in_code = kind == BlockKind::Code;
                    body.clear();
                }
                ScanEvent::BlockToken(t) => {
                    if in_code {
                        body.push_str(&t);
                    }
                }
                ScanEvent::BlockEnd => {
                    if in_code {
                        assert_eq!(
                            body.trim_end().chars().last(),
                            Some(';'),
                            "input {input:?} body {body:?}"
                        );
                    }
                    in_code = false;
                }
                ScanEvent::Prose(_) => {}
            }
        }
    }
}

#[test]
fn whitespace_only_prose_between_fences_is_suppressed() {
    let input =
        "```tsx agent.run\n1;```\n\t \n```json agent.data => \"t\"\n{}``` \n ```tsx agent.run\n2;```";
    for size in [1, 3, usize::MAX] {
        let prose: Vec<String> = scan_with_chunk_size(input, size)
            .into_iter()
            .filter_map(|e| match e {
                ScanEvent::Prose(t) => Some(t),
                _ => None,
            })
            .collect();
        assert!(prose.is_empty(), "chunk size {size} leaked prose {prose:?}");
    }
}
