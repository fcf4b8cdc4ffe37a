//! Error taxonomy shared across the toolkit.
//!
//! Two conditions that look like errors deliberately are not:
//!
//! - **Timeout expiry** — every deadline-bounded call returns a distinguished
//!   "nothing happened" value (`0` bytes, `None`, `false`) and leaves the
//!   resource usable. Timeouts are the steady-state of a polling loop, not a
//!   fault.
//! - **Overflow** — bounded queues, the requester's response map, and the
//!   task dispatchers signal backpressure through their return value
//!   (`false`, or an `Err` carrying the rejected value back to the caller).
//!
//! `ConnectionAborted` is a dedicated variant because the broker threads
//! pattern-match on it to decide between reconnect, re-accept, per-connection
//! teardown, and plain propagation.

use std::io;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Toolkit-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Peer closed the connection, or a write hit the SIGPIPE-equivalent.
    #[error("connection aborted by peer")]
    ConnectionAborted,

    /// Operation on a socket that is not in the required state.
    #[error("socket is not open")]
    NotOpen,

    /// Host/port resolution produced no usable endpoint.
    #[error("address resolution failed for {spec}: {source}")]
    Resolve {
        /// Human-readable form of what was being resolved.
        spec: String,
        #[source]
        source: io::Error,
    },

    /// An OS call failed. `op` names the syscall for log readability.
    #[error("syscall {op} failed: {source}")]
    Syscall {
        /// Name of the failing operation (`"poll"`, `"connect"`, …).
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// The HTTP parser is in its bad state; `reset()` is required.
    #[error("HTTP parser is bad: {0}")]
    ParserBad(ParseError),

    /// `write_once` was called after chunked transmission started.
    #[error("message transmission is already chunked")]
    AlreadyChunked,

    /// A buffered writer still holds unsent bytes; `flush` first.
    #[error("flush needed before writing more data")]
    FlushNeeded,

    /// A lifecycle/contract violation (double start, write after finalize…).
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

/// Detailed description of an HTTP parse failure.
///
/// Captures the offending byte and where in the input it was seen. `line` and
/// `col` are 1-based; `pos` counts bytes from the start of the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// The byte that triggered the failure.
    pub ch: u8,
    /// Absolute byte offset within the current message.
    pub pos: usize,
    /// 1-based line number.
    pub line: usize,
    /// 1-based column number.
    pub col: usize,
    /// What went wrong.
    pub msg: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "HTTP-message parsing error (pos: {}, line: {}, col: {}, character: {:#04x}): {}",
            self.pos, self.line, self.col, self.ch, self.msg
        )
    }
}

impl Error {
    /// Wrap an `io::Error` from the named syscall, translating the
    /// aborted-connection family into [`Error::ConnectionAborted`].
    pub(crate) fn from_syscall(op: &'static str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe => Error::ConnectionAborted,
            _ => Error::Syscall { op, source },
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
