//! Incremental fence scanner
//!
//! A byte-at-a-time state machine that segments a live markdown stream into
//! prose and typed fenced blocks without ever buffering to end of input.
//! Feed chunks in as they arrive; complete structure comes out immediately,
//! with a safety tail of at most two backticks retained so a sentinel split
//! across chunk boundaries is never emitted piecemeal.
//!
//! The scanner has no error path: every byte is either consumed as structure
//! or emitted as prose.

/// Fence sentinel length; the retained safety tail is one byte shorter
const SENTINEL_LEN: usize = 3;

/// Block flavor of a recognized fence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Code,
    Data,
}

/// Scanner output unit
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// A run of prose text
    Prose(String),
    /// A recognized fence opened
    BlockStart {
        kind: BlockKind,
        index: u32,
        target: Option<String>,
    },
    /// A run of body text for the open block
    BlockToken(String),
    /// The open block closed
    BlockEnd,
}

#[derive(Debug)]
enum State {
    Prose,
    /// Inside a header line, after the opening sentinel
    Header { buf: String },
    /// Inside the body of a recognized fence
    Body { kind: BlockKind },
    /// Inside the body of an unrecognized fence, re-emitted as prose
    Passthrough,
}

enum HeaderKind {
    Code,
    Data(String),
    Unknown,
}

/// Incremental fence scanner; see the module docs
#[derive(Debug)]
pub struct FenceScanner {
    state: State,
    /// Pending backticks not yet classified (0..SENTINEL_LEN)
    ticks: usize,
    /// Whitespace-only prose held back after a recognized fence; dropped if
    /// the next structure is another recognized fence, flushed otherwise
    hold: String,
    after_fence: bool,
    next_index: u32,
    /// Last body char emitted for the open code block
    code_last: Option<char>,
}

impl Default for FenceScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulates output for one `feed` call, flushing text runs in order
/// whenever a structural event interleaves.
struct Out {
    events: Vec<ScanEvent>,
    prose: String,
    body: String,
}

impl Out {
    fn new() -> Self {
        Self {
            events: Vec::new(),
            prose: String::new(),
            body: String::new(),
        }
    }

    fn flush_text(&mut self) {
        if !self.prose.is_empty() {
            let text = std::mem::take(&mut self.prose);
            self.events.push(ScanEvent::Prose(text));
        }
        if !self.body.is_empty() {
            let text = std::mem::take(&mut self.body);
            self.events.push(ScanEvent::BlockToken(text));
        }
    }

    fn event(&mut self, ev: ScanEvent) {
        self.flush_text();
        self.events.push(ev);
    }

    fn finish(mut self) -> Vec<ScanEvent> {
        self.flush_text();
        self.events
    }
}

impl FenceScanner {
    pub fn new() -> Self {
        Self {
            state: State::Prose,
            ticks: 0,
            hold: String::new(),
            after_fence: false,
            next_index: 0,
            code_last: None,
        }
    }

    /// Feed a chunk, producing every event that is already unambiguous
    pub fn feed(&mut self, chunk: &str) -> Vec<ScanEvent> {
        let mut out = Out::new();
        for c in chunk.chars() {
            self.step(c, &mut out);
        }
        out.finish()
    }

    /// Signal end of stream, flushing whatever remains
    pub fn finish(&mut self) -> Vec<ScanEvent> {
        let mut out = Out::new();
        match std::mem::replace(&mut self.state, State::Prose) {
            State::Prose => {
                self.flush_ticks_prose(&mut out);
            }
            State::Header { buf } => {
                // Never became a fence; the sentinel and partial header are
                // plain prose.
                self.prose(&mut out, "```");
                self.prose(&mut out, &buf);
            }
            State::Body { kind } => {
                // Unterminated known fence: flush as the block body.
                for _ in 0..self.ticks {
                    self.body_char(&mut out, '`');
                }
                self.ticks = 0;
                self.close_block(kind, &mut out);
            }
            State::Passthrough => {
                self.flush_ticks_prose(&mut out);
            }
        }
        self.ticks = 0;
        self.hold.clear();
        self.after_fence = false;
        out.finish()
    }

    fn step(&mut self, c: char, out: &mut Out) {
        match &mut self.state {
            State::Prose => {
                if c == '`' {
                    self.ticks += 1;
                    if self.ticks == SENTINEL_LEN {
                        self.ticks = 0;
                        self.state = State::Header { buf: String::new() };
                    }
                } else {
                    self.flush_ticks_prose(out);
                    self.prose_char(out, c);
                }
            }
            State::Header { buf } => {
                if c == '\n' {
                    let header = std::mem::take(buf);
                    self.resolve_header(header, out);
                } else {
                    buf.push(c);
                }
            }
            State::Body { kind } => {
                let kind = *kind;
                if c == '`' {
                    self.ticks += 1;
                    if self.ticks == SENTINEL_LEN {
                        self.ticks = 0;
                        self.close_block(kind, out);
                        self.state = State::Prose;
                    }
                } else {
                    for _ in 0..self.ticks {
                        self.body_char(out, '`');
                    }
                    self.ticks = 0;
                    self.body_char(out, c);
                }
            }
            State::Passthrough => {
                if c == '`' {
                    self.ticks += 1;
                    if self.ticks == SENTINEL_LEN {
                        self.ticks = 0;
                        self.prose(out, "```");
                        self.state = State::Prose;
                    }
                } else {
                    self.flush_ticks_prose(out);
                    self.prose_char(out, c);
                }
            }
        }
    }

    fn resolve_header(&mut self, header: String, out: &mut Out) {
        match classify_header(&header) {
            HeaderKind::Code => {
                self.open_block(BlockKind::Code, None, out);
            }
            HeaderKind::Data(target) => {
                self.open_block(BlockKind::Data, Some(target), out);
            }
            HeaderKind::Unknown => {
                // Re-emit verbatim into the surrounding prose.
                self.prose(out, "```");
                self.prose(out, &header);
                self.prose_char(out, '\n');
                self.state = State::Passthrough;
            }
        }
    }

    fn open_block(&mut self, kind: BlockKind, target: Option<String>, out: &mut Out) {
        // Whitespace-only prose between two recognized fences is suppressed.
        self.hold.clear();
        self.after_fence = false;
        let index = self.next_index;
        self.next_index += 1;
        out.event(ScanEvent::BlockStart {
            kind,
            index,
            target,
        });
        self.code_last = None;
        self.state = State::Body { kind };
    }

    fn close_block(&mut self, kind: BlockKind, out: &mut Out) {
        if kind == BlockKind::Code && self.code_last != Some(';') {
            out.body.push(';');
        }
        out.event(ScanEvent::BlockEnd);
        self.after_fence = true;
    }

    fn flush_ticks_prose(&mut self, out: &mut Out) {
        for _ in 0..self.ticks {
            self.prose_char(out, '`');
        }
        self.ticks = 0;
    }

    fn prose(&mut self, out: &mut Out, text: &str) {
        for c in text.chars() {
            self.prose_char(out, c);
        }
    }

    fn prose_char(&mut self, out: &mut Out, c: char) {
        if self.after_fence {
            self.hold.push(c);
            if !c.is_whitespace() {
                self.after_fence = false;
                out.prose.push_str(&self.hold);
                self.hold.clear();
            }
        } else {
            out.prose.push(c);
        }
    }

    fn body_char(&mut self, out: &mut Out, c: char) {
        self.code_last = Some(c);
        out.body.push(c);
    }
}

fn classify_header(raw: &str) -> HeaderKind {
    let header = raw.strip_suffix('\r').unwrap_or(raw).trim();

    let mut parts = header.split_whitespace();
    if let (Some(lang), Some(tag), None) = (parts.next(), parts.next(), parts.next()) {
        if lang.eq_ignore_ascii_case("tsx") && tag.eq_ignore_ascii_case("agent.run") {
            return HeaderKind::Code;
        }
    }

    match parse_data_header(header) {
        Some(id) => HeaderKind::Data(id),
        None => HeaderKind::Unknown,
    }
}

/// `json WS+ agent.data WS* => WS* QUOTE ID QUOTE WS*`, keywords
/// case-insensitive, ID captured verbatim
fn parse_data_header(header: &str) -> Option<String> {
    let rest = strip_keyword(header, "json")?;
    let rest = strip_ci(rest.trim_start(), "agent.data")?;
    let rest = rest.trim_start().strip_prefix("=>")?;
    let rest = rest.trim_start();

    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let inner = &rest[1..];
    let end = inner.find(quote)?;
    if end == 0 {
        return None;
    }
    let tail = inner[end + 1..].trim();
    if !tail.is_empty() {
        return None;
    }
    Some(inner[..end].to_string())
}

/// Strip a case-insensitive keyword that must be followed by whitespace
fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = strip_ci(s, keyword)?;
    let first = rest.chars().next()?;
    first.is_whitespace().then_some(rest)
}

fn strip_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &s[prefix.len()..])
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run a full input through the scanner in one chunk
    fn scan(input: &str) -> Vec<ScanEvent> {
        scan_chunked(&[input])
    }

    fn scan_chunked(chunks: &[&str]) -> Vec<ScanEvent> {
        let mut scanner = FenceScanner::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(scanner.feed(chunk));
        }
        events.extend(scanner.finish());
        events
    }

    /// Collapse adjacent text runs so tests compare structure, not chunking
    fn collapse(events: Vec<ScanEvent>) -> Vec<ScanEvent> {
        let mut out: Vec<ScanEvent> = Vec::new();
        for ev in events {
            match (out.last_mut(), ev) {
                (Some(ScanEvent::Prose(acc)), ScanEvent::Prose(t)) => acc.push_str(&t),
                (Some(ScanEvent::BlockToken(acc)), ScanEvent::BlockToken(t)) => acc.push_str(&t),
                (_, ev) => out.push(ev),
            }
        }
        out
    }

    #[test]
    fn plain_prose_passes_through() {
        let events = collapse(scan("Hi"));
        assert_eq!(events, vec![ScanEvent::Prose("Hi".into())]);
    }

    #[test]
    fn code_fence_with_terminator_kept() {
        let events = collapse(scan("```tsx agent.run\nconsole.log(1+1);```\n"));
        assert_eq!(
            events,
            vec![
                ScanEvent::BlockStart {
                    kind: BlockKind::Code,
                    index: 0,
                    target: None,
                },
                ScanEvent::BlockToken("console.log(1+1);".into()),
                ScanEvent::BlockEnd,
            ]
        );
    }

    #[test]
    fn code_fence_appends_missing_terminator() {
        let events = collapse(scan("```tsx agent.run\nconsole.log(1+1);\n```"));
        assert_eq!(
            events,
            vec![
                ScanEvent::BlockStart {
                    kind: BlockKind::Code,
                    index: 0,
                    target: None,
                },
                ScanEvent::BlockToken("console.log(1+1);\n;".into()),
                ScanEvent::BlockEnd,
            ]
        );
    }

    #[test]
    fn data_fence_captures_target() {
        let events = collapse(scan("```json agent.data => \"chart\"\n{\"a\":1}\n```"));
        assert_eq!(
            events,
            vec![
                ScanEvent::BlockStart {
                    kind: BlockKind::Data,
                    index: 0,
                    target: Some("chart".into()),
                },
                ScanEvent::BlockToken("{\"a\":1}\n".into()),
                ScanEvent::BlockEnd,
            ]
        );
    }

    #[test]
    fn data_header_variants() {
        for header in [
            "json agent.data => 'chart'",
            "JSON AGENT.DATA=>\"chart\"",
            "  json   agent.data   =>   \"chart\"  ",
        ] {
            match classify_header(header) {
                HeaderKind::Data(id) => assert_eq!(id, "chart", "header {header:?}"),
                _ => panic!("header {header:?} not recognized as data"),
            }
        }
    }

    #[test]
    fn data_header_rejects_empty_or_unbalanced_id() {
        for header in [
            "json agent.data => \"\"",
            "json agent.data => \"x",
            "json agent.data => x",
            "jsonagent.data => \"x\"",
            "json agent.data \"x\"",
        ] {
            assert!(
                matches!(classify_header(header), HeaderKind::Unknown),
                "header {header:?}"
            );
        }
    }

    #[test]
    fn header_case_and_cr_tolerated() {
        let events = collapse(scan("```TSX Agent.Run\r\n1;```"));
        assert!(matches!(
            events[0],
            ScanEvent::BlockStart {
                kind: BlockKind::Code,
                ..
            }
        ));
    }

    #[test]
    fn unknown_fence_is_passthrough_prose() {
        let input = "before\n```python\nprint(1)\n```\nafter";
        let events = collapse(scan(input));
        assert_eq!(events, vec![ScanEvent::Prose(input.into())]);
    }

    #[test]
    fn chunk_split_sentinel_and_header() {
        // The S6 shape: sentinel and header split across three chunks.
        let events = collapse(scan_chunked(&[
            "A\n``",
            "`tsx agent.run\nconsole.log('x');\n`",
            "``\nZ",
        ]));
        assert_eq!(
            events,
            vec![
                ScanEvent::Prose("A\n".into()),
                ScanEvent::BlockStart {
                    kind: BlockKind::Code,
                    index: 0,
                    target: None,
                },
                ScanEvent::BlockToken("console.log('x');\n;".into()),
                ScanEvent::BlockEnd,
                ScanEvent::Prose("\nZ".into()),
            ]
        );
    }

    #[test]
    fn whitespace_between_fences_suppressed() {
        let input = "```tsx agent.run\n1;```\n  \n```tsx agent.run\n2;```";
        let events = collapse(scan(input));
        let prose: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ScanEvent::Prose(_)))
            .collect();
        assert!(prose.is_empty(), "got prose: {prose:?}");
    }

    #[test]
    fn nonempty_prose_between_fences_preserved_verbatim() {
        let input = "```tsx agent.run\n1;```\n  mid  \n```tsx agent.run\n2;```";
        let events = collapse(scan(input));
        assert!(events.contains(&ScanEvent::Prose("\n  mid  \n".into())));
    }

    #[test]
    fn block_indices_shared_across_kinds() {
        let input = "```tsx agent.run\n1;```x```json agent.data => \"t\"\n{}```y```tsx agent.run\n2;```";
        let indices: Vec<u32> = scan(input)
            .into_iter()
            .filter_map(|e| match e {
                ScanEvent::BlockStart { index, .. } => Some(index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn unterminated_known_fence_flushes_as_body() {
        let events = collapse(scan("```tsx agent.run\nconsole.log(1)"));
        assert_eq!(
            events,
            vec![
                ScanEvent::BlockStart {
                    kind: BlockKind::Code,
                    index: 0,
                    target: None,
                },
                ScanEvent::BlockToken("console.log(1);".into()),
                ScanEvent::BlockEnd,
            ]
        );
    }

    #[test]
    fn unterminated_header_flushes_as_prose() {
        let events = collapse(scan("text ```tsx agent.ru"));
        assert_eq!(events, vec![ScanEvent::Prose("text ```tsx agent.ru".into())]);
    }

    #[test]
    fn stray_backticks_are_prose() {
        let events = collapse(scan("a `b` c ``d"));
        assert_eq!(events, vec![ScanEvent::Prose("a `b` c ``d".into())]);
    }

    #[test]
    fn chunk_invariance_small() {
        let input = "Hi\n```tsx agent.run\nconsole.log(1);\n```\ntail ```json agent.data => 'x'\n{\"a\":1}```";
        let whole = collapse(scan(input));
        // Split at every position, including through the sentinels.
        for split in 1..input.len() {
            if !input.is_char_boundary(split) {
                continue;
            }
            let (a, b) = input.split_at(split);
            assert_eq!(collapse(scan_chunked(&[a, b])), whole, "split at {split}");
        }
    }
}
