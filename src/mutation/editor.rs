//! Method-level text surgery on class-based source files.
//!
//! Nothing here parses a language. A class body is whatever sits between the
//! `{` after `class <Name>` and its matching `}`; a method is a signature
//! match followed by a braced block. Brace matching skips string and char
//! literals and comments, which is enough for C#/Java/TypeScript-shaped code.

use regex::Regex;

/// Result of one edit. `Unchanged` carries the reason for the log line.
#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    Changed(String),
    Unchanged(&'static str),
}

impl EditOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed(_))
    }
}

pub trait SourceEditor: Send + Sync {
    /// Insert a method, or grow an existing one's body. Never shrinks.
    fn add_method(&self, source: &str, class_name: &str, signature: &str, body: &str)
    -> EditOutcome;

    /// Replace the body of the first method matching `signature`.
    fn update_method(
        &self,
        source: &str,
        class_name: &str,
        signature: &str,
        body: &str,
    ) -> EditOutcome;

    /// Remove the first method matching `signature`, body included.
    fn delete_method(&self, source: &str, class_name: &str, signature: &str) -> EditOutcome;
}

/// Brace-counting [`SourceEditor`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BraceEditor;

/// Byte offsets of a located method: signature start, body `{`, body `}`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct MethodSpan {
    start: usize,
    open: usize,
    close: usize,
}

impl BraceEditor {
    pub fn new() -> Self {
        Self
    }

    /// Byte offsets of the class body's `{` and matching `}`.
    fn class_body(source: &str, class_name: &str) -> Option<(usize, usize)> {
        let pattern = format!(r"\bclass\s+{}\b", regex::escape(class_name));
        let re = Regex::new(&pattern).ok()?;
        let m = re.find(source)?;
        let open = m.end() + source[m.end()..].find('{')?;
        let close = matching_brace(source, open)?;
        Some((open, close))
    }

    fn find_method(source: &str, class_name: &str, signature: &str) -> Option<MethodSpan> {
        let (class_open, class_close) = Self::class_body(source, class_name)?;
        let re = signature_regex(signature)?;
        let body = &source[class_open + 1..class_close];
        let m = re.find(body)?;
        let start = class_open + 1 + m.start();
        let open = class_open + m.end();
        let close = matching_brace(source, open)?;
        Some(MethodSpan { start, open, close })
    }
}

impl SourceEditor for BraceEditor {
    fn add_method(
        &self,
        source: &str,
        class_name: &str,
        signature: &str,
        body: &str,
    ) -> EditOutcome {
        let body = normalize_body(body);
        if body.is_empty() {
            return EditOutcome::Unchanged("empty body");
        }
        if let Some(span) = Self::find_method(source, class_name, signature) {
            let existing = inner_text(&source[span.open..=span.close]);
            let requested = inner_text(&body);
            if requested == existing || requested.len() <= existing.len() {
                return EditOutcome::Unchanged("requested body is not longer");
            }
            return EditOutcome::Changed(splice(source, span.open, span.close + 1, &body));
        }
        let Some((_, class_close)) = Self::class_body(source, class_name) else {
            return EditOutcome::Unchanged("class not found");
        };
        let insert = format!("\n    {} {}\n", signature.trim(), body);
        EditOutcome::Changed(splice(source, class_close, class_close, &insert))
    }

    fn update_method(
        &self,
        source: &str,
        class_name: &str,
        signature: &str,
        body: &str,
    ) -> EditOutcome {
        let body = normalize_body(body);
        if body.is_empty() {
            return EditOutcome::Unchanged("empty body");
        }
        let Some(span) = Self::find_method(source, class_name, signature) else {
            return EditOutcome::Unchanged("method not found");
        };
        if &source[span.open..=span.close] == body {
            return EditOutcome::Unchanged("body already matches");
        }
        EditOutcome::Changed(splice(source, span.open, span.close + 1, &body))
    }

    fn delete_method(&self, source: &str, class_name: &str, signature: &str) -> EditOutcome {
        let Some(span) = Self::find_method(source, class_name, signature) else {
            return EditOutcome::Unchanged("method not found");
        };
        // Take modifiers before the signature and the rest of the last line.
        let line_start = source[..span.start].rfind('\n').map_or(0, |i| i + 1);
        let start = if source[line_start..span.start]
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c.is_whitespace())
        {
            line_start
        } else {
            span.start
        };
        let mut end = span.close + 1;
        let rest = &source[end..];
        let trailing = rest.len() - rest.trim_start_matches([' ', '\t', '\r']).len();
        if rest[trailing..].starts_with('\n') {
            end += trailing + 1;
        }
        EditOutcome::Changed(splice(source, start, end, ""))
    }
}

/// Wrap a bare body in braces. Empty input stays empty.
pub fn normalize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return trimmed.to_string();
    }
    format!("{{\n        {}\n    }}", trimmed)
}

/// Text between a block's outer braces, trimmed.
fn inner_text(block: &str) -> &str {
    let trimmed = block.trim();
    trimmed
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .unwrap_or(trimmed)
        .trim()
}

fn splice(source: &str, from: usize, to: usize, with: &str) -> String {
    let mut out = String::with_capacity(source.len() + with.len());
    out.push_str(&source[..from]);
    out.push_str(with);
    out.push_str(&source[to..]);
    out
}

/// Signature matcher tolerant of whitespace differences, anchored on a
/// following `{`.
fn signature_regex(signature: &str) -> Option<Regex> {
    let mut pattern = String::new();
    let mut prev_word = false;
    for token in tokenize(signature.trim()) {
        let is_word = token.chars().all(|c| c.is_alphanumeric() || c == '_');
        if pattern.is_empty() {
            if is_word {
                pattern.push_str(r"\b");
            }
        } else if prev_word && is_word {
            pattern.push_str(r"\s+");
        } else {
            pattern.push_str(r"\s*");
        }
        pattern.push_str(&regex::escape(token));
        prev_word = is_word;
    }
    if pattern.is_empty() {
        return None;
    }
    pattern.push_str(r"\s*\{");
    Regex::new(&pattern).ok()
}

/// Split into identifier runs and single punctuation chars, dropping spaces.
fn tokenize(s: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut word_start: Option<usize> = None;
    for (i, c) in s.char_indices() {
        let is_word = c.is_alphanumeric() || c == '_';
        match (is_word, word_start) {
            (true, None) => word_start = Some(i),
            (true, Some(_)) => {}
            (false, Some(start)) => {
                tokens.push(&s[start..i]);
                word_start = None;
            }
            (false, None) => {}
        }
        if !is_word && !c.is_whitespace() {
            tokens.push(&s[i..i + c.len_utf8()]);
        }
    }
    if let Some(start) = word_start {
        tokens.push(&s[start..]);
    }
    tokens
}

/// Index of the `}` matching the `{` at `open`, skipping literals and
/// comments.
pub(crate) fn matching_brace(source: &str, open: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 1;
            }
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}
