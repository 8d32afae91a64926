//! Parser for the line-oriented command files that drive a station process.
//!
//! Grammar (see the crate's top-level documentation for the full spec):
//! `Wait for receiving <K> frame[s]` and `Frame <S>, To SP <D> [text|$path]`.
//! Blank lines and `#`-comments are skipped; unparseable lines are ignored,
//! matching the reference's tolerant line scanner.

use std::path::PathBuf;

/// The payload a `Frame` directive wants sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Literal text, including the bare-decimal-of-`seq` shorthand.
    Text(String),
    /// Contents of the file at this path, chunked by the caller.
    File(PathBuf),
}

/// One parsed line from a command file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Directive {
    Wait { frames: u64 },
    Send { seq: u32, dst: u32, payload: Payload },
}

/// Parse a single command-file line. Returns `None` for comments, blank
/// lines, and anything that doesn't match the grammar.
pub fn parse_line(line: &str) -> Option<Directive> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    if let Some(rest) = trimmed.strip_prefix("Wait for receiving ") {
        let count_str = rest.split_whitespace().next()?;
        let frames: u64 = count_str.parse().ok()?;
        return Some(Directive::Wait { frames });
    }
    if let Some(rest) = trimmed.strip_prefix("Frame ") {
        let (seq_part, rest) = rest.split_once(',')?;
        let seq: u32 = seq_part.trim().parse().ok()?;
        let rest = rest.trim().strip_prefix("To SP ")?;
        let (dst_part, text) = match rest.split_once(char::is_whitespace) {
            Some((d, t)) => (d, t.trim_start()),
            None => (rest, ""),
        };
        let dst: u32 = dst_part.trim().parse().ok()?;
        let payload = if let Some(path) = text.strip_prefix('$') {
            Payload::File(PathBuf::from(path))
        } else if text.is_empty() {
            Payload::Text(seq.to_string())
        } else {
            Payload::Text(text.to_string())
        };
        return Some(Directive::Send { seq, dst, payload });
    }
    None
}
