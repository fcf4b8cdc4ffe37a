//! Non-blocking TCP socket with deadline-bounded operations.
//!
//! State machine:
//!
//! ```text
//! Closed ──open()──► Open ──bind()──► Bound ──listen()──► Listening
//!                      │                                      │
//!                      └──connect()──► Connected ◄──accept()──┘
//!                                       (peer socket)
//! any ──close()──► Closed
//! ```
//!
//! Every I/O operation takes a relative [`Timeout`], converted once to an
//! absolute deadline so EINTR/WouldBlock retries never stretch the budget:
//!
//! - `read`/`write` return `0` on deadline expiry (the connection is still
//!   live); a peer close surfaces as [`Error::ConnectionAborted`].
//! - `accept` returns `None` on expiry.
//!
//! Readiness waits go through `poll(2)`. I/O on a connected socket takes
//! `&self` (the fd is shared safely via `Read for &TcpStream`), which is what
//! lets a broker's receiver and sender threads work one socket concurrently:
//! the receiver owns state transitions, the sender only writes.
//!
//! Writes cannot raise SIGPIPE: the Rust runtime ignores the signal, so a
//! write to a closed peer comes back as `EPIPE` and is mapped to
//! `ConnectionAborted`.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};

use crate::clock::{Timeout, Timestamp};
use crate::error::{Error, Result};
use crate::net::addr::{AddrFamily, TcpAddrInfo};

/// Deadline-bounded I/O seam for the HTTP stream reader/writer.
pub trait IoDevice {
    /// Read up to `buf.len()` bytes. `Ok(0)` means the timeout expired.
    fn read(&mut self, buf: &mut [u8], timeout: Timeout) -> Result<usize>;

    /// Write up to `buf.len()` bytes. `Ok(0)` means the timeout expired.
    fn write(&mut self, buf: &[u8], timeout: Timeout) -> Result<usize>;
}

#[derive(Debug)]
enum SocketState {
    Closed,
    Open(Socket),
    Bound(Socket),
    Listening(Socket),
    Connected(TcpStream),
}

impl SocketState {
    fn name(&self) -> &'static str {
        match self {
            SocketState::Closed => "closed",
            SocketState::Open(_) => "open",
            SocketState::Bound(_) => "bound",
            SocketState::Listening(_) => "listening",
            SocketState::Connected(_) => "connected",
        }
    }
}

/// Non-blocking TCP stream socket.
#[derive(Debug)]
pub struct TcpSocket {
    state: SocketState,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
}

impl TcpSocket {
    /// Create a closed socket; call [`TcpSocket::open`] before use.
    #[must_use]
    pub fn new() -> Self {
        TcpSocket {
            state: SocketState::Closed,
            local_addr: None,
            remote_addr: None,
        }
    }

    /// Open a non-blocking stream socket of the given family.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if the socket is already open.
    pub fn open(&mut self, family: AddrFamily) -> Result<()> {
        if !matches!(self.state, SocketState::Closed) {
            return Err(Error::InvalidState("socket is already open"));
        }
        let domain = match family {
            AddrFamily::IpV4 => Domain::IPV4,
            AddrFamily::IpV6 => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| Error::from_syscall("socket", e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| Error::from_syscall("fcntl", e))?;
        self.state = SocketState::Open(socket);
        Ok(())
    }

    /// Bind with `SO_REUSEADDR`, iterating endpoints until one binds.
    pub fn bind(&mut self, addr: &TcpAddrInfo) -> Result<()> {
        let socket = match &self.state {
            SocketState::Open(s) => s,
            SocketState::Closed => return Err(Error::NotOpen),
            _ => return Err(Error::InvalidState("socket is not in the open state")),
        };
        socket
            .set_reuse_address(true)
            .map_err(|e| Error::from_syscall("setsockopt", e))?;
        let mut last_err = None;
        for endpoint in addr.endpoints() {
            match socket.bind(&(*endpoint).into()) {
                Ok(()) => {
                    self.local_addr = socket.local_addr().ok().and_then(|a| a.as_socket());
                    if let SocketState::Open(s) = std::mem::replace(&mut self.state, SocketState::Closed) {
                        self.state = SocketState::Bound(s);
                    }
                    return Ok(());
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(Error::from_syscall(
            "bind",
            last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable)),
        ))
    }

    /// Switch a bound socket to the listening state.
    pub fn listen(&mut self, backlog: u32) -> Result<()> {
        let socket = match &self.state {
            SocketState::Bound(s) => s,
            SocketState::Closed => return Err(Error::NotOpen),
            _ => return Err(Error::InvalidState("socket is not bound")),
        };
        socket
            .listen(backlog as i32)
            .map_err(|e| Error::from_syscall("listen", e))?;
        if let SocketState::Bound(s) = std::mem::replace(&mut self.state, SocketState::Closed) {
            self.state = SocketState::Listening(s);
        }
        Ok(())
    }

    /// Await one incoming connection.
    ///
    /// Returns `None` if the timeout expired with nothing pending. The
    /// accepted peer socket is non-blocking and in the connected state.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionAborted`] if the listening socket was shut down
    /// or closed — broker accept loops pattern-match on it to decide
    /// between re-accept and teardown.
    pub fn accept(&self, timeout: Timeout) -> Result<Option<TcpSocket>> {
        let socket = match &self.state {
            SocketState::Listening(s) => s,
            SocketState::Closed => return Err(Error::ConnectionAborted),
            _ => return Err(Error::InvalidState("socket is not listening")),
        };
        let limit = Timestamp::limit(timeout);
        if !wait_ready(socket.as_raw_fd(), libc::POLLIN, limit)? {
            return Ok(None);
        }
        match socket.accept() {
            Ok((peer, _)) => {
                peer.set_nonblocking(true)
                    .map_err(|e| Error::from_syscall("fcntl", e))?;
                let stream: TcpStream = peer.into();
                Ok(Some(TcpSocket::from_stream(stream)))
            }
            // Raced with another accessor or the peer gave up; not fatal.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            // accept(2) on a listener shut down with shutdown(2) reports
            // EINVAL; surface it as the abort the caller re-accepts on.
            Err(e)
                if e.kind() == io::ErrorKind::InvalidInput
                    || e.raw_os_error() == Some(libc::EINVAL) =>
            {
                Err(Error::ConnectionAborted)
            }
            Err(e) => Err(Error::from_syscall("accept", e)),
        }
    }

    /// Connect to the first endpoint of `addr`, completing before return.
    ///
    /// Non-blocking connect plus a writable wait; the pending socket error is
    /// checked after readiness as usual.
    pub fn connect(&mut self, addr: &TcpAddrInfo, timeout: Timeout) -> Result<()> {
        let socket = match &self.state {
            SocketState::Open(s) => s,
            SocketState::Closed => return Err(Error::NotOpen),
            _ => return Err(Error::InvalidState("socket is not in the open state")),
        };
        let endpoint = addr.endpoints()[0];
        let limit = Timestamp::limit(timeout);
        match socket.connect(&endpoint.into()) {
            Ok(()) => {}
            Err(e) if in_progress(&e) => {
                if !wait_ready(socket.as_raw_fd(), libc::POLLOUT, limit)? {
                    return Err(Error::Syscall {
                        op: "connect",
                        source: io::Error::from(io::ErrorKind::TimedOut),
                    });
                }
                if let Some(err) = socket
                    .take_error()
                    .map_err(|e| Error::from_syscall("getsockopt", e))?
                {
                    return Err(Error::from_syscall("connect", err));
                }
            }
            Err(e) => return Err(Error::from_syscall("connect", e)),
        }
        if let SocketState::Open(s) = std::mem::replace(&mut self.state, SocketState::Closed) {
            let stream: TcpStream = s.into();
            *self = TcpSocket::from_stream(stream);
        }
        Ok(())
    }

    /// Deadline-bounded read. `Ok(0)` = timeout expired, connection live.
    pub fn read(&self, buf: &mut [u8], timeout: Timeout) -> Result<usize> {
        let stream = self.stream()?;
        let limit = Timestamp::limit(timeout);
        loop {
            if !wait_ready(stream.as_raw_fd(), libc::POLLIN, limit)? {
                return Ok(0);
            }
            match (&*stream).read(buf) {
                Ok(0) => return Err(Error::ConnectionAborted),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::from_syscall("recv", e)),
            }
        }
    }

    /// Deadline-bounded write. `Ok(0)` = timeout expired, nothing sent.
    pub fn write(&self, buf: &[u8], timeout: Timeout) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let stream = self.stream()?;
        let limit = Timestamp::limit(timeout);
        loop {
            if !wait_ready(stream.as_raw_fd(), libc::POLLOUT, limit)? {
                return Ok(0);
            }
            match (&*stream).write(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::from_syscall("send", e)),
            }
        }
    }

    /// Shut down both directions of a connected or listening socket.
    ///
    /// Shutting down a listening socket unblocks a concurrent
    /// [`TcpSocket::accept`], which then fails with
    /// [`Error::ConnectionAborted`].
    pub fn shutdown(&self) -> Result<()> {
        match &self.state {
            SocketState::Connected(stream) => stream
                .shutdown(std::net::Shutdown::Both)
                .map_err(|e| Error::from_syscall("shutdown", e)),
            SocketState::Listening(socket) => socket
                .shutdown(std::net::Shutdown::Both)
                .map_err(|e| Error::from_syscall("shutdown", e)),
            SocketState::Closed => Err(Error::NotOpen),
            _ => Err(Error::InvalidState("socket is not connected")),
        }
    }

    /// Duplicate the descriptor of a connected socket.
    ///
    /// The clone shares the underlying connection; used by the brokers to
    /// hand the sender thread a writable handle while the receiver keeps
    /// ownership of connection transitions.
    pub fn try_clone(&self) -> Result<TcpSocket> {
        let stream = self.stream()?;
        let dup = stream
            .try_clone()
            .map_err(|e| Error::from_syscall("dup", e))?;
        Ok(TcpSocket::from_stream(dup))
    }

    /// Drop the descriptor and return to the closed state.
    pub fn close(&mut self) {
        self.state = SocketState::Closed;
        self.local_addr = None;
        self.remote_addr = None;
    }

    /// True while a peer connection is established.
    #[must_use]
    pub fn connected(&self) -> bool {
        matches!(self.state, SocketState::Connected(_))
    }

    /// True in any state but closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !matches!(self.state, SocketState::Closed)
    }

    /// Current state name (for logs).
    #[must_use]
    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Local address, populated on bind/connect/accept.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Peer address, populated on connect/accept.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn from_stream(stream: TcpStream) -> TcpSocket {
        let local_addr = stream.local_addr().ok();
        let remote_addr = stream.peer_addr().ok();
        TcpSocket {
            state: SocketState::Connected(stream),
            local_addr,
            remote_addr,
        }
    }

    fn stream(&self) -> Result<&TcpStream> {
        match &self.state {
            SocketState::Connected(s) => Ok(s),
            SocketState::Closed => Err(Error::NotOpen),
            _ => Err(Error::InvalidState("socket is not connected")),
        }
    }
}

impl Default for TcpSocket {
    fn default() -> Self {
        TcpSocket::new()
    }
}

impl IoDevice for TcpSocket {
    fn read(&mut self, buf: &mut [u8], timeout: Timeout) -> Result<usize> {
        TcpSocket::read(self, buf, timeout)
    }

    fn write(&mut self, buf: &[u8], timeout: Timeout) -> Result<usize> {
        TcpSocket::write(self, buf, timeout)
    }
}

fn in_progress(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == Some(libc::EINPROGRESS)
}

/// Wait until `fd` is ready for `events` or `limit` expires.
///
/// Returns `true` when ready. EINTR restarts with the remaining budget.
fn wait_ready(fd: RawFd, events: i16, limit: Timestamp) -> Result<bool> {
    loop {
        let mut pollfd = libc::pollfd {
            fd,
            events,
            revents: 0,
        };
        let timeout_ms = limit.left().as_poll_millis();
        let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if rc > 0 {
            // Error/hangup conditions are surfaced by the following I/O call.
            return Ok(true);
        }
        if rc == 0 {
            return Ok(false);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            if limit.expired() {
                return Ok(false);
            }
            continue;
        }
        return Err(Error::from_syscall("poll", err));
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
