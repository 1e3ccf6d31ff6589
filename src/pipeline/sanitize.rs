//! Fence stripping for generated source text.
//!
//! The generation service often wraps its program in a Markdown code fence:
//!
//! ````text
//! ```python
//! print("hello")
//! ```
//! ````
//!
//! `sanitize` recognizes a leading fence line (three or more backticks or
//! tildes, optionally followed by an info string such as a language tag) and a
//! trailing fence line (fence characters only). Anything between them is kept
//! byte-for-byte, including backtick runs that occur inside the program.
//! Stripping repeats until nothing changes, which makes `sanitize` idempotent.

use crate::errors::SanitizeError;

const MIN_FENCE_LEN: usize = 3;

/// Strip optional opening and closing fence lines from `raw`.
///
/// Fails with `SanitizeError::Empty` when nothing but whitespace remains.
pub fn sanitize(raw: &str) -> Result<&str, SanitizeError> {
    let mut current = trim_blank_lines(raw);
    loop {
        let next = strip_once(current);
        if next.len() == current.len() {
            break;
        }
        current = next;
    }

    if current.trim().is_empty() {
        return Err(SanitizeError::Empty);
    }
    Ok(current)
}

fn strip_once(text: &str) -> &str {
    let body = match text.split_once('\n') {
        Some((first, rest)) if is_opening_fence(first) => rest,
        None if is_opening_fence(text) => "",
        _ => text,
    };
    let body = match body.rsplit_once('\n') {
        Some((rest, last)) if is_closing_fence(last) => rest,
        None if is_closing_fence(body) => "",
        _ => body,
    };
    trim_blank_lines(body)
}

/// Drop whole blank lines at the start and trailing whitespace at the end.
/// Indentation of the first non-blank line is preserved.
fn trim_blank_lines(text: &str) -> &str {
    let mut start = 0;
    for line in text.split_inclusive('\n') {
        if !line.trim().is_empty() {
            break;
        }
        start += line.len();
    }
    text[start..].trim_end()
}

/// Length of the run of fence characters at the start of `line`, if it forms
/// a fence (at least three of the same character).
fn fence_run(line: &str) -> Option<(char, usize)> {
    let marker = line.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let run = line.chars().take_while(|c| *c == marker).count();
    (run >= MIN_FENCE_LEN).then_some((marker, run))
}

fn is_opening_fence(line: &str) -> bool {
    let line = line.trim();
    let Some((marker, run)) = fence_run(line) else {
        return false;
    };
    // Backtick fences may not carry backticks in their info string.
    let info = &line[run * marker.len_utf8()..];
    marker != '`' || !info.contains('`')
}

fn is_closing_fence(line: &str) -> bool {
    let line = line.trim();
    match fence_run(line) {
        Some((marker, run)) => line.len() == run * marker.len_utf8(),
        None => false,
    }
}
