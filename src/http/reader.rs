//! Buffered HTTP message reader over an [`IoDevice`].
//!
//! Wraps an [`HttpMessageParser`] with a fixed-size read buffer. One `read`
//! call drains leftover buffered bytes into the parser first, then refills
//! from the device — the first refill honors the caller's timeout, further
//! refills use a zero timeout (take what is already there, never stall a
//! half-parsed message on a quiet socket).

use crate::clock::Timeout;
use crate::error::{Error, Result};
use crate::http::parser::HttpMessageParser;
use crate::net::IoDevice;

/// Default read buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Incremental message reader.
pub struct HttpMessageReader {
    parser: HttpMessageParser,
    buffer: Vec<u8>,
    buffer_len: usize,
    buffer_pos: usize,
    bytes_consumed: u64,
}

impl HttpMessageReader {
    /// Reader around `parser` with the default 4096-byte buffer.
    #[must_use]
    pub fn new(parser: HttpMessageParser) -> Self {
        HttpMessageReader::with_buffer_size(parser, DEFAULT_READ_BUFFER_SIZE)
    }

    /// Reader with an explicit buffer size.
    #[must_use]
    pub fn with_buffer_size(parser: HttpMessageParser, buffer_size: usize) -> Self {
        HttpMessageReader {
            parser,
            buffer: vec![0u8; buffer_size],
            buffer_len: 0,
            buffer_pos: 0,
            bytes_consumed: 0,
        }
    }

    /// The wrapped parser: start line, headers, state.
    #[must_use]
    pub fn parser(&self) -> &HttpMessageParser {
        &self.parser
    }

    /// True once the current message is fully parsed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.parser.is_completed()
    }

    /// True after a parse failure; see [`HttpMessageParser::error`].
    #[must_use]
    pub fn is_bad(&self) -> bool {
        self.parser.is_bad()
    }

    /// Total bytes fed to the parser since construction.
    #[must_use]
    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    /// Reset the parser for a fresh message; buffered bytes are kept (they
    /// belong to the next message on the connection).
    pub fn reset(&mut self) {
        self.parser.reset();
    }

    /// Read one message increment, collecting body bytes into `body_out`.
    ///
    /// Returns the number of body bytes appended. Call until
    /// [`HttpMessageReader::is_completed`]; the next call after completion
    /// auto-resets the parser and starts the next message.
    ///
    /// # Errors
    ///
    /// [`Error::ParserBad`] if the stream was malformed (current call or a
    /// previous one), connection/syscall errors from the device.
    pub fn read(
        &mut self,
        device: &mut dyn IoDevice,
        body_out: &mut Vec<u8>,
        timeout: Timeout,
    ) -> Result<usize> {
        if let Some(error) = self.parser.error() {
            return Err(Error::ParserBad(error.clone()));
        }
        if self.parser.is_completed() {
            self.parser.reset();
        }
        let mut body_bytes = 0;

        // Leftover bytes from the previous device read come first.
        if self.drain_buffer(body_out, &mut body_bytes)? {
            return Ok(body_bytes);
        }

        let mut first_read = true;
        loop {
            let read_timeout = if first_read { timeout } else { Timeout::ZERO };
            first_read = false;
            let n = device.read(&mut self.buffer, read_timeout)?;
            if n == 0 {
                // Timeout expired with the message still incomplete.
                return Ok(body_bytes);
            }
            self.buffer_len = n;
            self.buffer_pos = 0;
            if self.drain_buffer(body_out, &mut body_bytes)? {
                return Ok(body_bytes);
            }
        }
    }

    /// Feed buffered bytes to the parser. Returns `true` when the caller
    /// should stop (message completed or went bad).
    fn drain_buffer(&mut self, body_out: &mut Vec<u8>, body_bytes: &mut usize) -> Result<bool> {
        while self.buffer_pos < self.buffer_len {
            let b = self.buffer[self.buffer_pos];
            self.buffer_pos += 1;
            self.bytes_consumed += 1;
            if self.parser.parse(b)? {
                body_out.push(b);
                *body_bytes += 1;
            }
            if self.parser.is_completed() {
                return Ok(true);
            }
            if let Some(error) = self.parser.error() {
                return Err(Error::ParserBad(error.clone()));
            }
        }
        Ok(false)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
