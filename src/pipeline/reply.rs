//! Clean-up of the agent's textual reply before it reaches the client.
//!
//! The reply is informational only (the CSV file is the real result), so the
//! rules are few: strip an outer code fence, normalise line endings, trim,
//! and cap the length.

use once_cell::sync::Lazy;
use regex::Regex;

/// Longest message returned in a parse response, in characters.
pub const MAX_SUMMARY_CHARS: usize = 500;

/// Message used when the backend said nothing useful.
pub const DEFAULT_SUMMARY: &str = "PDF processed successfully";

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*\n(.*?)\n?```$").expect("valid regex"));

/// Summarise a raw backend reply for the `message` field.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip an outer code fence (```` ```csv ```` etc.)
/// 3. Trim surrounding whitespace
/// 4. Truncate to [`MAX_SUMMARY_CHARS`] characters, marking the cut with `…`
///
/// An empty result falls back to [`DEFAULT_SUMMARY`].
pub fn summarize(raw: &str) -> String {
    let s = normalise_line_endings(raw);
    let s = strip_fences(s.trim());
    let s = s.trim();
    if s.is_empty() {
        return DEFAULT_SUMMARY.to_string();
    }
    truncate(s, MAX_SUMMARY_CHARS)
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn strip_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn truncate(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &input[..cut]),
        None => input.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fence_and_crlf() {
        let raw = "```csv\r\na,b\r\n1,2\r\n```";
        assert_eq!(summarize(raw), "a,b\n1,2");
    }

    #[test]
    fn plain_text_is_trimmed() {
        assert_eq!(summarize("  Wrote 3 tables.  \n"), "Wrote 3 tables.");
    }

    #[test]
    fn empty_reply_uses_default() {
        assert_eq!(summarize(""), DEFAULT_SUMMARY);
        assert_eq!(summarize("```\n```"), DEFAULT_SUMMARY);
    }

    #[test]
    fn long_reply_is_truncated_on_char_boundary() {
        let raw = "é".repeat(MAX_SUMMARY_CHARS + 10);
        let s = summarize(&raw);
        assert_eq!(s.chars().count(), MAX_SUMMARY_CHARS + 1);
        assert!(s.ends_with('…'));
    }
}
