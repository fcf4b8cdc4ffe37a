//! Buffered HTTP message writer over an [`IoDevice`].
//!
//! Three body strategies, mutually exclusive per message:
//!
//! 1. [`HttpMessageWriter::write_once`] — `Content-Length` body in one shot;
//! 2. [`HttpMessageWriter::write_chunk`] — chunked transfer encoding, one
//!    chunk per call, terminated by [`HttpMessageWriter::finalize`] (which
//!    also emits any header fields added after the first chunk as the
//!    trailer);
//! 3. [`HttpMessageWriter::write_bodyless`] — start line + headers only.
//!
//! Bytes the device did not take before the deadline stay in the pending
//! buffer: [`HttpMessageWriter::needs_flush`] reports that, every write
//! entry point refuses with [`Error::FlushNeeded`] until
//! [`HttpMessageWriter::flush`] drains it. Once a header field has been
//! composed onto the wire it can no longer be replaced or removed, and once
//! chunked output started `write_once` fails with [`Error::AlreadyChunked`].

use bytes::BytesMut;

use crate::clock::{Timeout, Timestamp};
use crate::error::{Error, Result};
use crate::net::IoDevice;

/// Start line of the message under composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    /// `METHOD URI VERSION`.
    Request {
        method: String,
        uri: String,
        version: String,
    },
    /// `VERSION STATUS REASON`.
    Response {
        version: String,
        status: u16,
        reason: String,
    },
}

impl StartLine {
    /// Convenience request start line.
    #[must_use]
    pub fn request(method: &str, uri: &str, version: &str) -> Self {
        StartLine::Request {
            method: method.to_string(),
            uri: uri.to_string(),
            version: version.to_string(),
        }
    }

    /// Convenience response start line.
    #[must_use]
    pub fn response(version: &str, status: u16, reason: &str) -> Self {
        StartLine::Response {
            version: version.to_string(),
            status,
            reason: reason.to_string(),
        }
    }

    fn compose(&self) -> String {
        match self {
            StartLine::Request { method, uri, version } => {
                format!("{method} {uri} {version}\r\n")
            }
            StartLine::Response { version, status, reason } => {
                format!("{version} {status} {reason}\r\n")
            }
        }
    }
}

struct HeaderField {
    name: String,
    value: String,
    composed: bool,
}

/// Buffered writer for one HTTP message at a time.
pub struct HttpMessageWriter {
    start_line: StartLine,
    header: Vec<HeaderField>,
    transmission_started: bool,
    chunked_header_composed: bool,
    start_line_composed: bool,
    finalizing: bool,
    send_buffer: BytesMut,
}

impl HttpMessageWriter {
    /// Writer for a message beginning with `start_line`.
    #[must_use]
    pub fn new(start_line: StartLine) -> Self {
        HttpMessageWriter {
            start_line,
            header: Vec::new(),
            transmission_started: false,
            chunked_header_composed: false,
            start_line_composed: false,
            finalizing: false,
            send_buffer: BytesMut::new(),
        }
    }

    /// Replace the start line of the next message.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] once the current start line went to the wire.
    pub fn set_start_line(&mut self, start_line: StartLine) -> Result<()> {
        if self.start_line_composed {
            return Err(Error::InvalidState("start line has already been composed"));
        }
        self.start_line = start_line;
        Ok(())
    }

    /// Set a header field, replacing previous same-name fields.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if a field to replace was already composed
    /// onto the wire.
    pub fn set_header_field(&mut self, name: &str, value: &str) -> Result<()> {
        if self
            .header
            .iter()
            .any(|f| f.name.eq_ignore_ascii_case(name) && f.composed)
        {
            return Err(Error::InvalidState("header field has already been composed"));
        }
        self.header.retain(|f| !f.name.eq_ignore_ascii_case(name));
        self.header.push(HeaderField {
            name: name.to_string(),
            value: value.to_string(),
            composed: false,
        });
        Ok(())
    }

    /// Append a header field without replacing existing same-name fields.
    pub fn append_header_field(&mut self, name: &str, value: &str) {
        self.header.push(HeaderField {
            name: name.to_string(),
            value: value.to_string(),
            composed: false,
        });
    }

    /// True if some field `name` carries exactly `value`.
    #[must_use]
    pub fn header_contains(&self, name: &str, value: &str) -> bool {
        self.header
            .iter()
            .any(|f| f.name.eq_ignore_ascii_case(name) && f.value == value)
    }

    /// All values recorded under `name`, in insertion order.
    #[must_use]
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.header
            .iter()
            .filter(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
            .collect()
    }

    /// Remove every field named `name`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if one of them was already composed.
    pub fn remove_header_field(&mut self, name: &str) -> Result<()> {
        if self
            .header
            .iter()
            .any(|f| f.name.eq_ignore_ascii_case(name) && f.composed)
        {
            return Err(Error::InvalidState("header field has already been composed"));
        }
        self.header.retain(|f| !f.name.eq_ignore_ascii_case(name));
        Ok(())
    }

    /// True while unsent bytes are pending; flush before writing more.
    #[must_use]
    pub fn needs_flush(&self) -> bool {
        !self.send_buffer.is_empty()
    }

    /// True once any byte of the message reached the device.
    #[must_use]
    pub fn transmission_started(&self) -> bool {
        self.transmission_started
    }

    /// Forget the message under composition entirely.
    pub fn reset(&mut self) {
        self.header.clear();
        self.transmission_started = false;
        self.chunked_header_composed = false;
        self.start_line_composed = false;
        self.finalizing = false;
        self.send_buffer.clear();
    }

    /// Write the whole message with a `Content-Length` body in one call.
    ///
    /// Returns `true` when everything reached the device; `false` leaves the
    /// rest pending for [`HttpMessageWriter::flush`].
    pub fn write_once(
        &mut self,
        device: &mut dyn IoDevice,
        body: &[u8],
        timeout: Timeout,
    ) -> Result<bool> {
        if self.chunked_header_composed {
            return Err(Error::AlreadyChunked);
        }
        if self.needs_flush() {
            return Err(Error::FlushNeeded);
        }
        self.remove_header_field("Transfer-Encoding")?;
        if body.is_empty() {
            self.remove_header_field("Content-Length")?;
        } else {
            self.set_header_field("Content-Length", &body.len().to_string())?;
        }
        self.compose_head();
        self.send_buffer.extend_from_slice(body);
        self.finalizing = true;
        self.drain(device, timeout)
    }

    /// Write one chunk; the first call emits the start line and headers with
    /// `Transfer-Encoding: chunked`.
    pub fn write_chunk(
        &mut self,
        device: &mut dyn IoDevice,
        chunk: &[u8],
        timeout: Timeout,
    ) -> Result<bool> {
        if self.needs_flush() {
            return Err(Error::FlushNeeded);
        }
        if chunk.is_empty() {
            return Ok(true);
        }
        if !self.chunked_header_composed {
            self.set_header_field("Transfer-Encoding", "chunked")?;
            self.compose_head();
            self.chunked_header_composed = true;
        }
        self.send_buffer
            .extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        self.send_buffer.extend_from_slice(chunk);
        self.send_buffer.extend_from_slice(b"\r\n");
        self.drain(device, timeout)
    }

    /// Write the start line and headers of a bodyless message.
    pub fn write_bodyless(&mut self, device: &mut dyn IoDevice, timeout: Timeout) -> Result<bool> {
        if self.chunked_header_composed {
            return Err(Error::AlreadyChunked);
        }
        if self.needs_flush() {
            return Err(Error::FlushNeeded);
        }
        self.remove_header_field("Transfer-Encoding")?;
        self.remove_header_field("Content-Length")?;
        self.compose_head();
        self.finalizing = true;
        self.drain(device, timeout)
    }

    /// Terminate the message.
    ///
    /// Chunked: emits the zero-size chunk, the trailer (header fields added
    /// since the first chunk) and the final CRLF, then resets for the next
    /// message. Non-chunked: equivalent to a final flush.
    pub fn finalize(&mut self, device: &mut dyn IoDevice, timeout: Timeout) -> Result<bool> {
        if self.needs_flush() {
            return Err(Error::FlushNeeded);
        }
        if self.chunked_header_composed {
            self.send_buffer.extend_from_slice(b"0\r\n");
            let trailer = self.compose_header_fields();
            self.send_buffer.extend_from_slice(trailer.as_bytes());
            self.send_buffer.extend_from_slice(b"\r\n");
            self.finalizing = true;
            self.drain(device, timeout)
        } else {
            self.reset();
            Ok(true)
        }
    }

    /// Push pending bytes to the device; `true` once drained.
    pub fn flush(&mut self, device: &mut dyn IoDevice, timeout: Timeout) -> Result<bool> {
        if self.send_buffer.is_empty() {
            if self.finalizing {
                self.reset();
            }
            return Ok(true);
        }
        self.drain(device, timeout)
    }

    fn compose_head(&mut self) {
        let first_line = self.start_line.compose();
        self.send_buffer.extend_from_slice(first_line.as_bytes());
        self.start_line_composed = true;
        let header = self.compose_header_fields();
        self.send_buffer.extend_from_slice(header.as_bytes());
        self.send_buffer.extend_from_slice(b"\r\n");
    }

    fn compose_header_fields(&mut self) -> String {
        let mut result = String::new();
        for field in &mut self.header {
            if field.composed {
                continue;
            }
            result.push_str(&field.name);
            result.push_str(": ");
            result.push_str(&field.value);
            result.push_str("\r\n");
            field.composed = true;
        }
        result
    }

    /// Write pending bytes until drained or the deadline expires.
    fn drain(&mut self, device: &mut dyn IoDevice, timeout: Timeout) -> Result<bool> {
        let limit = Timestamp::limit(timeout);
        while !self.send_buffer.is_empty() {
            let n = device.write(&self.send_buffer, limit.left())?;
            if n == 0 {
                return Ok(false);
            }
            self.transmission_started = true;
            let _ = self.send_buffer.split_to(n);
        }
        if self.finalizing {
            self.reset();
        }
        Ok(true)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
