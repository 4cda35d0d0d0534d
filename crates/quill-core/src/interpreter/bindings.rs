//! Statement classification and binding-name extraction
//!
//! Streamed statements are wrapped in async IIFEs before evaluation, so
//! top-level `const`/`let` and function declarations would vanish with the
//! wrapper scope. The engine therefore extracts the bound names up front and
//! writes them back to the shared context after the statement settles.
//!
//! Name extraction walks binding patterns textually with a depth-aware
//! splitter that honours `{}`, `[]`, `()` nesting and string literals, and
//! never confuses `=>` with an assignment.

/// How a statement participates in cross-statement scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    /// `const`/`let` declaration; `names` are the bound identifiers
    VarDecl { names: Vec<String> },
    /// Named `function` / `async function` declaration
    FnDecl { name: String },
    /// Everything else; executed without hoisting
    Other,
}

pub fn classify(stmt: &str) -> StatementKind {
    let t = stmt.trim_start();

    for keyword in ["const", "let"] {
        if let Some(rest) = strip_word(t, keyword) {
            let names = declaration_names(rest);
            if !names.is_empty() {
                return StatementKind::VarDecl { names };
            }
            return StatementKind::Other;
        }
    }

    let after_async = strip_word(t, "async").map(str::trim_start).unwrap_or(t);
    if let Some(rest) = strip_word(after_async, "function") {
        let rest = rest.trim_start().trim_start_matches('*').trim_start();
        let name = leading_ident(rest);
        if !name.is_empty() {
            return StatementKind::FnDecl { name };
        }
    }

    StatementKind::Other
}

/// Names bound by the declarator list following a `const`/`let` keyword
fn declaration_names(rest: &str) -> Vec<String> {
    let rest = rest.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    let mut names = Vec::new();
    for declarator in split_top_level(rest, ',') {
        let pattern = match find_assignment(declarator) {
            Some(eq) => &declarator[..eq],
            None => declarator,
        };
        pattern_names(pattern.trim(), &mut names);
    }
    names
}

/// Recursively collect the identifiers bound by one binding pattern
fn pattern_names(pattern: &str, out: &mut Vec<String>) {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return;
    }

    if let Some(inner) = strip_delimiters(pattern, '{', '}') {
        for entry in split_top_level(inner, ',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            if let Some(rest) = entry.strip_prefix("...") {
                pattern_names(rest, out);
            } else if let Some(colon) = find_top_level(entry, ':') {
                // `{key: alias}` binds the alias side, possibly nested.
                pattern_names(&entry[colon + 1..], out);
            } else if let Some(eq) = find_assignment(entry) {
                // `{key = default}` is a shorthand with default.
                push_ident(&entry[..eq], out);
            } else {
                push_ident(entry, out);
            }
        }
        return;
    }

    if let Some(inner) = strip_delimiters(pattern, '[', ']') {
        for element in split_top_level(inner, ',') {
            let element = element.trim();
            if element.is_empty() {
                continue; // elision hole
            }
            if let Some(rest) = element.strip_prefix("...") {
                pattern_names(rest, out);
            } else {
                pattern_names(element, out);
            }
        }
        return;
    }

    // Identifier form: strip a default, then one level of TS annotation.
    let mut ident = pattern;
    if let Some(eq) = find_assignment(ident) {
        ident = &ident[..eq];
    }
    if let Some(colon) = find_top_level(ident, ':') {
        ident = &ident[..colon];
    }
    push_ident(ident, out);
}

fn push_ident(s: &str, out: &mut Vec<String>) {
    let name = leading_ident(s.trim());
    if !name.is_empty() {
        out.push(name);
    }
}

fn leading_ident(s: &str) -> String {
    s.chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
        .collect()
}

/// Strip a keyword that must end at a word boundary
fn strip_word<'a>(s: &'a str, word: &str) -> Option<&'a str> {
    let rest = s.strip_prefix(word)?;
    match rest.chars().next() {
        Some(c) if c.is_alphanumeric() || c == '_' || c == '$' => None,
        _ => Some(rest),
    }
}

fn strip_delimiters(s: &str, open: char, close: char) -> Option<&str> {
    let s = s.trim();
    if s.starts_with(open) && s.ends_with(close) && s.len() >= 2 {
        Some(&s[open.len_utf8()..s.len() - close.len_utf8()])
    } else {
        None
    }
}

/// Tracks bracket depth and string state while walking pattern text
#[derive(Default)]
struct Nesting {
    depth: i32,
    quote: Option<char>,
    escaped: bool,
}

impl Nesting {
    /// Advance over one char; returns true when the char sits at top level
    /// outside any string literal
    fn step(&mut self, c: char) -> bool {
        if let Some(q) = self.quote {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == q {
                self.quote = None;
            }
            return false;
        }
        match c {
            '"' | '\'' | '`' => {
                self.quote = Some(c);
                false
            }
            '{' | '[' | '(' => {
                self.depth += 1;
                false
            }
            '}' | ']' | ')' => {
                self.depth -= 1;
                false
            }
            _ => self.depth == 0,
        }
    }
}

/// Split on a separator at top level only
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut nesting = Nesting::default();
    let mut start = 0;
    for (i, c) in s.char_indices() {
        if nesting.step(c) && c == sep {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Byte index of a top-level occurrence of `needle` outside strings
fn find_top_level(s: &str, needle: char) -> Option<usize> {
    let mut nesting = Nesting::default();
    for (i, c) in s.char_indices() {
        if nesting.step(c) && c == needle {
            return Some(i);
        }
    }
    None
}

/// Byte index of the top-level `=` that splits pattern from initializer.
/// Skips `=>`, `==`, `===`, `<=`, `>=`, `!=`.
fn find_assignment(s: &str) -> Option<usize> {
    let mut nesting = Nesting::default();
    let mut prev: Option<char> = None;
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let active = nesting.step(c);
        if active && c == '=' {
            let next = chars.peek().map(|(_, n)| *n);
            let part_of_operator = matches!(next, Some('=') | Some('>'))
                || matches!(prev, Some('=') | Some('!') | Some('<') | Some('>'));
            if !part_of_operator {
                return Some(i);
            }
        }
        prev = Some(c);
    }
    None
}
