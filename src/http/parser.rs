//! Incremental byte-at-a-time HTTP/1.x message parser.
//!
//! One state machine drives request and response reading alike; the three
//! leading tokens are generic (METHOD/URI/VERSION for requests,
//! VERSION/STATUS/REASON for responses) and differ only in their allowed
//! characters and length caps, installed by [`HttpMessageParser::request`]
//! and [`HttpMessageParser::response`].
//!
//! ```text
//! Message ─► FirstToken ─SP─► SecondToken ─SP─► ThirdToken ─CR LF─► Header*
//!   Header: Name ':' Value CR LF (continuation lines fold to one space)
//! ─► EndOfHeader ─► identity body | chunked body (+ trailer) ─► Completed
//! ```
//!
//! [`HttpMessageParser::parse`] returns `Ok(true)` exactly when the fed byte
//! is a body byte the caller should collect. A malformed byte moves the
//! parser to its bad state (`Ok(false)`, [`HttpMessageParser::error`]
//! populated); feeding a bad parser is an [`Error::ParserBad`]. Feeding a
//! completed parser resets it first, so a connection can stream messages
//! back to back.

use crate::error::{Error, ParseError, Result};
use crate::http::{
    is_cr, is_http_char, is_http_control, is_lf, is_space_or_tab, is_token_char, Headers,
};

/// Longest accepted chunk-size line, in hex digits.
const MAX_CHUNK_SIZE_DIGITS: usize = 15;

/// Allowed-character predicate plus length cap for one leading token.
#[derive(Debug, Clone, Copy)]
pub struct TokenRule {
    /// Permitted characters.
    pub allowed: fn(u8) -> bool,
    /// Longest accepted token.
    pub max_len: usize,
}

fn any_http_char(b: u8) -> bool {
    is_http_char(b) && !is_http_control(b)
}

fn uri_char(b: u8) -> bool {
    any_http_char(b) && b != b' '
}

fn version_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'/' || b == b'.'
}

fn digit_char(b: u8) -> bool {
    b.is_ascii_digit()
}

/// Parser states, exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    ParsingMessage,
    ParsingFirstToken,
    ParsingFirstTokenSP,
    ParsingSecondToken,
    ParsingSecondTokenSP,
    ParsingThirdToken,
    ParsingFirstLineLF,
    ParsingHeader,
    ParsingHeaderName,
    ParsingHeaderValue,
    ParsingHeaderValueLF,
    ParsingHeaderValueLWS,
    ParsingEndOfHeader,
    ParsingIdentityBody,
    ParsingChunkSize,
    ParsingChunkExtension,
    ParsingChunkSizeLF,
    ParsingChunk,
    ParsingChunkCR,
    ParsingChunkLF,
    ParsingTrailerHeader,
    ParsingTrailerHeaderName,
    ParsingTrailerHeaderValue,
    ParsingTrailerHeaderValueLF,
    ParsingTrailerHeaderValueLWS,
    ParsingFinalLF,
    MessageCompleted,
}

/// Incremental HTTP/1.x message parser.
pub struct HttpMessageParser {
    state: ParserState,
    error: Option<ParseError>,
    pos: usize,
    line: usize,
    col: usize,
    first_token: String,
    second_token: String,
    third_token: String,
    header_name: String,
    header_value: String,
    headers: Headers,
    content_length: usize,
    identity_bytes_parsed: usize,
    chunk_size_str: String,
    chunk_size: usize,
    chunk_bytes_parsed: usize,
    lws_folded: bool,
    rules: [TokenRule; 3],
    max_header_name_len: usize,
    max_header_value_len: usize,
    max_headers_amount: usize,
}

impl HttpMessageParser {
    /// Generic message parser: any non-control US-ASCII in all three tokens.
    #[must_use]
    pub fn new() -> Self {
        HttpMessageParser::with_rules([
            TokenRule { allowed: any_http_char, max_len: 4096 },
            TokenRule { allowed: any_http_char, max_len: 4096 },
            TokenRule { allowed: any_http_char, max_len: 4096 },
        ])
    }

    /// Request parser: METHOD (token, ≤ 20), URI (≤ 4096), VERSION (≤ 20).
    #[must_use]
    pub fn request() -> Self {
        HttpMessageParser::with_rules([
            TokenRule { allowed: is_token_char, max_len: 20 },
            TokenRule { allowed: uri_char, max_len: 4096 },
            TokenRule { allowed: version_char, max_len: 20 },
        ])
    }

    /// Response parser: VERSION (≤ 20), STATUS (digits, ≤ 3), REASON (≤ 1024).
    #[must_use]
    pub fn response() -> Self {
        HttpMessageParser::with_rules([
            TokenRule { allowed: version_char, max_len: 20 },
            TokenRule { allowed: digit_char, max_len: 3 },
            TokenRule { allowed: any_http_char, max_len: 1024 },
        ])
    }

    /// Parser with explicit token rules.
    #[must_use]
    pub fn with_rules(rules: [TokenRule; 3]) -> Self {
        HttpMessageParser {
            state: ParserState::ParsingMessage,
            error: None,
            pos: 0,
            line: 1,
            col: 1,
            first_token: String::new(),
            second_token: String::new(),
            third_token: String::new(),
            header_name: String::new(),
            header_value: String::new(),
            headers: Headers::new(),
            content_length: 0,
            identity_bytes_parsed: 0,
            chunk_size_str: String::new(),
            chunk_size: 0,
            chunk_bytes_parsed: 0,
            lws_folded: false,
            rules,
            max_header_name_len: 256,
            max_header_value_len: 4096,
            max_headers_amount: 128,
        }
    }

    /// Override the header limits (name length, value length, field count).
    pub fn set_header_limits(&mut self, name_len: usize, value_len: usize, amount: usize) {
        self.max_header_name_len = name_len;
        self.max_header_value_len = value_len;
        self.max_headers_amount = amount;
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// True once a full message has been parsed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state == ParserState::MessageCompleted
    }

    /// True after a malformed byte; [`HttpMessageParser::reset`] recovers.
    #[must_use]
    pub fn is_bad(&self) -> bool {
        self.error.is_some()
    }

    /// The parse failure, if any.
    #[must_use]
    pub fn error(&self) -> Option<&ParseError> {
        self.error.as_ref()
    }

    /// True while the parser is inside a message body.
    #[must_use]
    pub fn body_expected(&self) -> bool {
        matches!(
            self.state,
            ParserState::ParsingIdentityBody | ParserState::ParsingChunk
        )
    }

    /// First start-line token (request METHOD / response VERSION).
    #[must_use]
    pub fn first_token(&self) -> &str {
        &self.first_token
    }

    /// Second start-line token (request URI / response STATUS).
    #[must_use]
    pub fn second_token(&self) -> &str {
        &self.second_token
    }

    /// Third start-line token (request VERSION / response REASON).
    #[must_use]
    pub fn third_token(&self) -> &str {
        &self.third_token
    }

    /// Parsed headers (trailer fields included once parsed).
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Return to the initial state, dropping message data and any error.
    pub fn reset(&mut self) {
        self.state = ParserState::ParsingMessage;
        self.error = None;
        self.pos = 0;
        self.line = 1;
        self.col = 1;
        self.first_token.clear();
        self.second_token.clear();
        self.third_token.clear();
        self.header_name.clear();
        self.header_value.clear();
        self.headers.clear();
        self.content_length = 0;
        self.identity_bytes_parsed = 0;
        self.chunk_size_str.clear();
        self.chunk_size = 0;
        self.chunk_bytes_parsed = 0;
        self.lws_folded = false;
    }

    /// Feed one byte.
    ///
    /// `Ok(true)` iff the byte is a body byte the caller should collect.
    ///
    /// # Errors
    ///
    /// [`Error::ParserBad`] when called while already in the bad state.
    pub fn parse(&mut self, b: u8) -> Result<bool> {
        if let Some(error) = &self.error {
            return Err(Error::ParserBad(error.clone()));
        }
        if self.state == ParserState::MessageCompleted {
            self.reset();
        }
        let mut body_byte = false;
        match self.state {
            ParserState::ParsingMessage => {
                if is_space_or_tab(b) {
                    // Leading whitespace is ignored.
                } else if (self.rules[0].allowed)(b) {
                    self.first_token.push(b as char);
                    self.state = ParserState::ParsingFirstToken;
                } else {
                    self.set_bad(b, "HTTP-message starts with the invalid character");
                }
            }
            ParserState::ParsingFirstToken => {
                if is_space_or_tab(b) {
                    self.state = ParserState::ParsingFirstTokenSP;
                } else if (self.rules[0].allowed)(b) {
                    if self.first_token.len() >= self.rules[0].max_len {
                        self.set_bad(b, "First token is too long");
                    } else {
                        self.first_token.push(b as char);
                    }
                } else {
                    self.set_bad(b, "Invalid character in first token");
                }
            }
            ParserState::ParsingFirstTokenSP => {
                if is_space_or_tab(b) {
                    // Extra separator whitespace is ignored.
                } else if (self.rules[1].allowed)(b) {
                    self.second_token.push(b as char);
                    self.state = ParserState::ParsingSecondToken;
                } else {
                    self.set_bad(b, "Second token starts with the invalid character");
                }
            }
            ParserState::ParsingSecondToken => {
                if is_space_or_tab(b) {
                    self.state = ParserState::ParsingSecondTokenSP;
                } else if (self.rules[1].allowed)(b) {
                    if self.second_token.len() >= self.rules[1].max_len {
                        self.set_bad(b, "Second token is too long");
                    } else {
                        self.second_token.push(b as char);
                    }
                } else {
                    self.set_bad(b, "Invalid character in second token");
                }
            }
            ParserState::ParsingSecondTokenSP => {
                if is_space_or_tab(b) {
                    // Extra separator whitespace is ignored.
                } else if (self.rules[2].allowed)(b) {
                    self.third_token.push(b as char);
                    self.state = ParserState::ParsingThirdToken;
                } else {
                    self.set_bad(b, "Third token starts with the invalid character");
                }
            }
            ParserState::ParsingThirdToken => {
                if is_cr(b) {
                    self.state = ParserState::ParsingFirstLineLF;
                } else if (self.rules[2].allowed)(b) {
                    if self.third_token.len() >= self.rules[2].max_len {
                        self.set_bad(b, "Third token is too long");
                    } else {
                        self.third_token.push(b as char);
                    }
                } else {
                    self.set_bad(b, "Invalid character in third token");
                }
            }
            ParserState::ParsingFirstLineLF => {
                if is_lf(b) {
                    self.state = ParserState::ParsingHeader;
                } else {
                    self.set_bad(b, "First line's CR is followed by the invalid character");
                }
            }
            ParserState::ParsingHeader => self.parse_header(b, false),
            ParserState::ParsingHeaderName => self.parse_header_name(b, false),
            ParserState::ParsingHeaderValue => self.parse_header_value(b, false),
            ParserState::ParsingHeaderValueLF => self.parse_header_value_lf(b, false),
            ParserState::ParsingHeaderValueLWS => self.parse_header_value_lws(b, false),
            ParserState::ParsingEndOfHeader => {
                if is_lf(b) {
                    self.select_body();
                } else {
                    self.set_bad(b, "Header's CR is followed by the invalid character");
                }
            }
            ParserState::ParsingIdentityBody => {
                self.identity_bytes_parsed += 1;
                body_byte = true;
                if self.identity_bytes_parsed >= self.content_length {
                    self.state = ParserState::MessageCompleted;
                }
            }
            ParserState::ParsingChunkSize => {
                if b.is_ascii_hexdigit() {
                    if self.chunk_size_str.len() >= MAX_CHUNK_SIZE_DIGITS {
                        self.set_bad(b, "Chunk size is too long");
                    } else {
                        self.chunk_size_str.push(b as char);
                    }
                } else if self.chunk_size_str.is_empty() {
                    self.set_bad(b, "Empty chunk size");
                } else {
                    match usize::from_str_radix(&self.chunk_size_str, 16) {
                        Ok(size) => {
                            self.chunk_size = size;
                            self.chunk_bytes_parsed = 0;
                            self.chunk_size_str.clear();
                            if is_cr(b) {
                                self.state = ParserState::ParsingChunkSizeLF;
                            } else {
                                self.state = ParserState::ParsingChunkExtension;
                            }
                        }
                        Err(_) => self.set_bad(b, "Invalid chunk size unsigned integer value"),
                    }
                }
            }
            ParserState::ParsingChunkExtension => {
                // Chunk extensions are ignored.
                if is_cr(b) {
                    self.state = ParserState::ParsingChunkSizeLF;
                }
            }
            ParserState::ParsingChunkSizeLF => {
                if is_lf(b) {
                    self.state = if self.chunk_size > 0 {
                        ParserState::ParsingChunk
                    } else {
                        ParserState::ParsingTrailerHeader
                    };
                } else {
                    self.set_bad(b, "Chunk size's CR is followed by the invalid character");
                }
            }
            ParserState::ParsingChunk => {
                self.chunk_bytes_parsed += 1;
                body_byte = true;
                if self.chunk_bytes_parsed >= self.chunk_size {
                    self.state = ParserState::ParsingChunkCR;
                }
            }
            ParserState::ParsingChunkCR => {
                if is_cr(b) {
                    self.state = ParserState::ParsingChunkLF;
                } else {
                    self.set_bad(b, "Chunk data is followed by the invalid character");
                }
            }
            ParserState::ParsingChunkLF => {
                if is_lf(b) {
                    self.state = ParserState::ParsingChunkSize;
                } else {
                    self.set_bad(b, "Chunk data CR is followed by the invalid character");
                }
            }
            ParserState::ParsingTrailerHeader => self.parse_header(b, true),
            ParserState::ParsingTrailerHeaderName => self.parse_header_name(b, true),
            ParserState::ParsingTrailerHeaderValue => self.parse_header_value(b, true),
            ParserState::ParsingTrailerHeaderValueLF => self.parse_header_value_lf(b, true),
            ParserState::ParsingTrailerHeaderValueLWS => self.parse_header_value_lws(b, true),
            ParserState::ParsingFinalLF => {
                if is_lf(b) {
                    self.state = ParserState::MessageCompleted;
                } else {
                    self.set_bad(b, "Final CR is followed by the invalid character");
                }
            }
            ParserState::MessageCompleted => unreachable!("completed parser is reset above"),
        }
        // Position bookkeeping feeds the error context.
        self.pos += 1;
        if is_lf(b) {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Ok(body_byte)
    }

    /// Feed a slice, appending body bytes to `body_out`.
    ///
    /// Stops at message completion or on a malformed byte; returns how many
    /// input bytes were consumed.
    pub fn parse_buf(&mut self, input: &[u8], body_out: &mut Vec<u8>) -> Result<usize> {
        let mut consumed = 0;
        for &b in input {
            if self.parse(b)? {
                body_out.push(b);
            }
            consumed += 1;
            if self.is_completed() || self.is_bad() {
                break;
            }
        }
        Ok(consumed)
    }

    fn set_bad(&mut self, ch: u8, msg: &str) {
        self.error = Some(ParseError {
            ch,
            pos: self.pos,
            line: self.line,
            col: self.col,
            msg: msg.to_string(),
        });
    }

    fn select_body(&mut self) {
        if self.headers.contains_value("Transfer-Encoding", "chunked") {
            self.state = ParserState::ParsingChunkSize;
        } else if let Some(value) = self.headers.value("Content-Length") {
            match value.trim().parse::<usize>() {
                Ok(0) => self.state = ParserState::MessageCompleted,
                Ok(length) => {
                    self.content_length = length;
                    self.state = ParserState::ParsingIdentityBody;
                }
                Err(_) => {
                    self.set_bad(b'\n', "Invalid 'Content-Length' header field unsigned integer value");
                }
            }
        } else {
            self.state = ParserState::MessageCompleted;
        }
    }

    fn append_header(&mut self, b: u8) {
        if self.headers.len() >= self.max_headers_amount {
            self.set_bad(b, "Too many headers");
            return;
        }
        let name = self.header_name.trim().to_string();
        let value = self.header_value.trim().to_string();
        self.headers.insert(name, value);
        self.header_name.clear();
        self.header_value.clear();
    }

    fn parse_header(&mut self, b: u8, trailer: bool) {
        self.header_name.clear();
        self.header_value.clear();
        if is_cr(b) {
            self.state = if trailer {
                ParserState::ParsingFinalLF
            } else {
                ParserState::ParsingEndOfHeader
            };
        } else if b == b':' {
            self.set_bad(b, "Empty header field name");
        } else if is_token_char(b) {
            self.header_name.push(b as char);
            self.state = if trailer {
                ParserState::ParsingTrailerHeaderName
            } else {
                ParserState::ParsingHeaderName
            };
        } else {
            self.set_bad(b, "Header starts with the invalid character");
        }
    }

    fn parse_header_name(&mut self, b: u8, trailer: bool) {
        if is_cr(b) {
            self.set_bad(b, "Header is missing ':' separator");
        } else if b == b':' {
            self.state = if trailer {
                ParserState::ParsingTrailerHeaderValue
            } else {
                ParserState::ParsingHeaderValue
            };
        } else if is_token_char(b) {
            if self.header_name.len() < self.max_header_name_len {
                self.header_name.push(b as char);
            } else {
                self.set_bad(b, "Header name is too long");
            }
        } else {
            self.set_bad(b, "Header name contains the invalid character");
        }
    }

    fn parse_header_value(&mut self, b: u8, trailer: bool) {
        if is_cr(b) {
            self.state = if trailer {
                ParserState::ParsingTrailerHeaderValueLF
            } else {
                ParserState::ParsingHeaderValueLF
            };
        } else if !is_http_control(b) {
            if self.header_value.len() < self.max_header_value_len {
                self.header_value.push(b as char);
            } else {
                self.set_bad(b, "Header value is too long");
            }
        } else {
            self.set_bad(b, "Header value contains the invalid character");
        }
    }

    fn parse_header_value_lf(&mut self, b: u8, trailer: bool) {
        if is_lf(b) {
            self.state = if trailer {
                ParserState::ParsingTrailerHeaderValueLWS
            } else {
                ParserState::ParsingHeaderValueLWS
            };
        } else {
            self.set_bad(b, "Header's CR is followed by the invalid character");
        }
    }

    /// After a header line's CRLF: a SP/HTAB run continues the previous
    /// value (LWS folding, the whole run normalized to one space), a token
    /// starts the next header, a CR ends the section.
    fn parse_header_value_lws(&mut self, b: u8, trailer: bool) {
        if is_cr(b) {
            self.lws_folded = false;
            self.append_header(b);
            if !self.is_bad() {
                self.state = if trailer {
                    ParserState::ParsingFinalLF
                } else {
                    ParserState::ParsingEndOfHeader
                };
            }
        } else if is_space_or_tab(b) {
            // First whitespace of the fold becomes the single joining
            // space; the rest of the run is swallowed.
            if !self.lws_folded {
                if self.header_value.len() < self.max_header_value_len {
                    self.header_value.push(' ');
                    self.lws_folded = true;
                } else {
                    self.set_bad(b, "Header value is too long");
                }
            }
        } else if self.lws_folded {
            // First content byte of the continuation line resumes the value.
            self.lws_folded = false;
            if !is_http_control(b) {
                if self.header_value.len() < self.max_header_value_len {
                    self.header_value.push(b as char);
                    self.state = if trailer {
                        ParserState::ParsingTrailerHeaderValue
                    } else {
                        ParserState::ParsingHeaderValue
                    };
                } else {
                    self.set_bad(b, "Header value is too long");
                }
            } else {
                self.set_bad(b, "Header value contains the invalid character");
            }
        } else if b == b':' {
            self.set_bad(b, "Empty header field name");
        } else if is_token_char(b) {
            self.append_header(b);
            if !self.is_bad() {
                self.header_name.push(b as char);
                self.state = if trailer {
                    ParserState::ParsingTrailerHeaderName
                } else {
                    ParserState::ParsingHeaderName
                };
            }
        } else {
            self.set_bad(b, "Header starts with the invalid character");
        }
    }
}

impl Default for HttpMessageParser {
    fn default() -> Self {
        HttpMessageParser::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut HttpMessageParser, input: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        let consumed = parser.parse_buf(input, &mut body).expect("parse");
        assert_eq!(consumed, input.len(), "parser stopped early: {:?}", parser.error());
        body
    }

    #[test]
    fn test_get_request_round_trip() {
        let input = b"GET /hello?x=1 HTTP/1.1\r\nHost: example\r\nContent-Length: 5\r\n\r\nhello";
        let mut p = HttpMessageParser::request();
        let body = feed(&mut p, input);
        assert!(p.is_completed());
        assert!(!p.is_bad());
        assert_eq!(p.first_token(), "GET");
        assert_eq!(p.second_token(), "/hello?x=1");
        assert_eq!(p.third_token(), "HTTP/1.1");
        assert_eq!(p.headers().value("Host").as_deref(), Some("example"));
        assert_eq!(body, b"hello");
    }

    #[test]
    fn test_completion_lands_exactly_on_last_byte() {
        let input = b"GET / HTTP/1.1\r\nContent-Length: 2\r\n\r\nok";
        let mut p = HttpMessageParser::request();
        for (i, &b) in input.iter().enumerate() {
            p.parse(b).expect("parse");
            if i + 1 < input.len() {
                assert!(!p.is_completed(), "completed early at byte {i}");
            }
        }
        assert!(p.is_completed());
    }

    #[test]
    fn test_chunked_body_with_two_chunks() {
        let input =
            b"POST /u HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nabcde\r\n3\r\nfgh\r\n0\r\n\r\n";
        let mut p = HttpMessageParser::request();
        let body = feed(&mut p, input);
        assert!(p.is_completed());
        assert_eq!(body, b"abcdefgh");
    }

    #[test]
    fn test_chunk_extension_is_ignored() {
        let input = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3;ext=1\r\nabc\r\n0\r\n\r\n";
        let mut p = HttpMessageParser::request();
        let body = feed(&mut p, input);
        assert!(p.is_completed());
        assert_eq!(body, b"abc");
    }

    #[test]
    fn test_trailer_headers_are_collected() {
        let input = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nhi\r\n0\r\nX-Sum: abc123\r\n\r\n";
        let mut p = HttpMessageParser::request();
        let body = feed(&mut p, input);
        assert!(p.is_completed());
        assert_eq!(body, b"hi");
        assert_eq!(p.headers().value("X-Sum").as_deref(), Some("abc123"));
    }

    #[test]
    fn test_no_body_without_length_headers() {
        let input = b"GET / HTTP/1.1\r\nHost: h\r\n\r\n";
        let mut p = HttpMessageParser::request();
        let body = feed(&mut p, input);
        assert!(p.is_completed());
        assert!(body.is_empty());
    }

    #[test]
    fn test_zero_content_length_completes_at_header_end() {
        let input = b"GET / HTTP/1.1\r\nContent-Length: 0\r\n\r\n";
        let mut p = HttpMessageParser::request();
        feed(&mut p, input);
        assert!(p.is_completed());
    }

    #[test]
    fn test_chunked_takes_precedence_over_content_length() {
        let input = b"POST / HTTP/1.1\r\nContent-Length: 999\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nok\r\n0\r\n\r\n";
        let mut p = HttpMessageParser::request();
        let body = feed(&mut p, input);
        assert!(p.is_completed());
        assert_eq!(body, b"ok");
    }

    #[test]
    fn test_lws_folding_joins_with_single_space() {
        let input = b"GET / HTTP/1.1\r\nX-Long: first\r\n  second\r\n\r\n";
        let mut p = HttpMessageParser::request();
        feed(&mut p, input);
        assert!(p.is_completed());
        assert_eq!(p.headers().value("X-Long").as_deref(), Some("first second"));
    }

    #[test]
    fn test_header_value_leading_whitespace_is_stripped() {
        let input = b"GET / HTTP/1.1\r\nHost:    spaced.example   \r\n\r\n";
        let mut p = HttpMessageParser::request();
        feed(&mut p, input);
        assert_eq!(p.headers().value("Host").as_deref(), Some("spaced.example"));
    }

    #[test]
    fn test_duplicate_headers_preserve_order() {
        let input = b"GET / HTTP/1.1\r\nAccept: a\r\nAccept: b\r\n\r\n";
        let mut p = HttpMessageParser::request();
        feed(&mut p, input);
        assert_eq!(p.headers().value("Accept").as_deref(), Some("a, b"));
    }

    #[test]
    fn test_bad_content_length_is_rejected() {
        let input = b"GET / HTTP/1.1\r\nContent-Length: nope\r\n\r\n";
        let mut p = HttpMessageParser::request();
        let mut body = Vec::new();
        p.parse_buf(input, &mut body).expect("parse");
        assert!(p.is_bad());
        let err = p.error().expect("error");
        assert!(err.msg.contains("Content-Length"));
    }

    #[test]
    fn test_bare_lf_in_first_line_is_bad() {
        let input = b"GET / HTTP/1.1\nHost: h\r\n\r\n";
        let mut p = HttpMessageParser::request();
        let mut body = Vec::new();
        p.parse_buf(input, &mut body).expect("parse");
        assert!(p.is_bad());
    }

    #[test]
    fn test_method_length_cap() {
        let input = b"THISMETHODNAMEISWAYTOOLONG / HTTP/1.1\r\n\r\n";
        let mut p = HttpMessageParser::request();
        let mut body = Vec::new();
        p.parse_buf(input, &mut body).expect("parse");
        assert!(p.is_bad());
        assert!(p.error().expect("error").msg.contains("too long"));
    }

    #[test]
    fn test_parse_while_bad_is_an_error() {
        let mut p = HttpMessageParser::request();
        let mut body = Vec::new();
        p.parse_buf(b"\x01", &mut body).expect("first parse call");
        assert!(p.is_bad());
        assert!(matches!(p.parse(b'G'), Err(Error::ParserBad(_))));
        p.reset();
        assert!(!p.is_bad());
        assert!(p.parse(b'G').expect("parse after reset") == false);
    }

    #[test]
    fn test_error_carries_position() {
        let input = b"GET /x HTTP/1.1\r\nBad\x01Header: v\r\n\r\n";
        let mut p = HttpMessageParser::request();
        let mut body = Vec::new();
        p.parse_buf(input, &mut body).expect("parse");
        let err = p.error().expect("error").clone();
        assert_eq!(err.ch, 0x01);
        assert_eq!(err.line, 2);
        assert!(err.pos > 0);
    }

    #[test]
    fn test_back_to_back_messages_auto_reset() {
        let first = b"GET /a HTTP/1.1\r\n\r\n";
        let second = b"GET /b HTTP/1.1\r\n\r\n";
        let mut p = HttpMessageParser::request();
        feed(&mut p, first);
        assert_eq!(p.second_token(), "/a");
        feed(&mut p, second);
        assert_eq!(p.second_token(), "/b");
        assert!(p.is_completed());
    }

    #[test]
    fn test_response_parser_reads_status_line() {
        let input = b"HTTP/1.1 200 OK here\r\nContent-Length: 2\r\n\r\nhi";
        let mut p = HttpMessageParser::response();
        let body = feed(&mut p, input);
        assert!(p.is_completed());
        assert_eq!(p.first_token(), "HTTP/1.1");
        assert_eq!(p.second_token(), "200");
        assert_eq!(p.third_token(), "OK here");
        assert_eq!(body, b"hi");
    }

    #[test]
    fn test_response_status_must_be_numeric() {
        let input = b"HTTP/1.1 abc OK\r\n\r\n";
        let mut p = HttpMessageParser::response();
        let mut body = Vec::new();
        p.parse_buf(input, &mut body).expect("parse");
        assert!(p.is_bad());
    }

    #[test]
    fn test_too_many_headers_is_bad() {
        let mut p = HttpMessageParser::request();
        p.set_header_limits(256, 4096, 2);
        let input = b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n";
        let mut body = Vec::new();
        p.parse_buf(input, &mut body).expect("parse");
        assert!(p.is_bad());
        assert!(p.error().expect("error").msg.contains("Too many headers"));
    }
}
