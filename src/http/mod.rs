//! HTTP/1.x message handling: incremental parser, stream reader/writer,
//! cookie parsing.
//!
//! US-ASCII tokens, CRLF line terminators, HTTP/1.0 and HTTP/1.1 only.

mod cookies;
mod parser;
mod reader;
mod writer;

pub use cookies::{parse_request_cookies, RequestCookie};
pub use parser::{HttpMessageParser, ParserState, TokenRule};
pub use reader::{HttpMessageReader, DEFAULT_READ_BUFFER_SIZE};
pub use writer::{HttpMessageWriter, StartLine};

// ─── Lexical helpers ────────────────────────────────────────────────────────

pub(crate) fn is_space_or_tab(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

pub(crate) fn is_cr(b: u8) -> bool {
    b == b'\r'
}

pub(crate) fn is_lf(b: u8) -> bool {
    b == b'\n'
}

/// CHAR per RFC 2616: any US-ASCII octet.
pub(crate) fn is_http_char(b: u8) -> bool {
    b <= 127
}

/// CTL per RFC 2616: 0–31 plus DEL.
pub(crate) fn is_http_control(b: u8) -> bool {
    b < 32 || b == 127
}

/// token character per RFC 2616: CHAR, not CTL, not a separator.
pub(crate) fn is_token_char(b: u8) -> bool {
    if !is_http_char(b) || is_http_control(b) {
        return false;
    }
    !matches!(
        b,
        b'(' | b')'
            | b'<'
            | b'>'
            | b'@'
            | b','
            | b';'
            | b':'
            | b'\\'
            | b'"'
            | b'/'
            | b'['
            | b']'
            | b'?'
            | b'='
            | b'{'
            | b'}'
            | b' '
            | b'\t'
    )
}

// ─── Header multimap ────────────────────────────────────────────────────────

/// Insertion-ordered, case-insensitive header multimap.
///
/// Multiple same-name fields are preserved in order; [`Headers::value`]
/// presents them joined with `", "` per RFC 2616 §4.2.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Empty header set.
    #[must_use]
    pub fn new() -> Self {
        Headers::default()
    }

    /// Append one field, preserving insertion order.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// True if any field matches `name` (case-insensitive).
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// True if some field `name` has exactly `value` (both case-insensitive;
    /// header values that matter for framing — `chunked` — compare that way).
    #[must_use]
    pub fn contains_value(&self, name: &str, value: &str) -> bool {
        self.entries
            .iter()
            .any(|(n, v)| n.eq_ignore_ascii_case(name) && v.eq_ignore_ascii_case(value))
    }

    /// All values recorded under `name`, in insertion order.
    #[must_use]
    pub fn values(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// The single presented value: duplicates joined with `", "`.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<String> {
        let values = self.values(name);
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    /// Iterate `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Total number of fields (duplicates counted).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no fields are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every field.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_chars_exclude_separators() {
        assert!(is_token_char(b'G'));
        assert!(is_token_char(b'!'));
        assert!(!is_token_char(b':'));
        assert!(!is_token_char(b' '));
        assert!(!is_token_char(b'\x7f'));
        assert!(!is_token_char(0x80));
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let mut h = Headers::new();
        h.insert("Content-Type", "text/plain");
        assert!(h.contains("content-type"));
        assert!(h.contains_value("CONTENT-TYPE", "TEXT/PLAIN"));
        assert_eq!(h.value("content-TYPE").as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_duplicate_headers_join_with_comma() {
        let mut h = Headers::new();
        h.insert("Accept", "text/html");
        h.insert("Host", "example");
        h.insert("accept", "application/json");
        assert_eq!(h.values("Accept"), vec!["text/html", "application/json"]);
        assert_eq!(
            h.value("Accept").as_deref(),
            Some("text/html, application/json")
        );
        assert_eq!(h.len(), 3);
    }
}
