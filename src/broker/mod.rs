//! Message brokers: subsystems bridging a TCP connection and the message
//! fabric.
//!
//! Three variants share one shape — a receiver path decodes wire data into
//! messages and broadcasts them, a sender path consumes messages from
//! subscribed providers and writes them out:
//!
//! ```text
//!            ┌────────────── broker ───────────────┐
//! providers ─┼─► input MessageQueue ─► sender ─► TCP│
//!            │                                      │
//! consumers ◄┼── output MessageBus ◄─ receiver ◄─ TCP
//!            └──────────────────────────────────────┘
//! ```
//!
//! - [`client::MessageBrokerConnection`] — persistent outbound connection
//!   with auto-reconnect;
//! - [`listener::MessageBrokerListener`] — single-peer inbound connection
//!   with re-accept;
//! - [`service::MessageBrokerService`] — many-client service over a worker
//!   pool.
//!
//! The brokers impose no wire format: the application supplies the
//! receive/send callbacks through [`ReceiverHandler`] and [`SenderHandler`].
//! [`LineReceiver`]/[`LineSender`] implement the canonical LF/CRLF-delimited
//! text protocol.

pub mod client;
pub mod listener;
pub mod service;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::clock::{Timeout, Timestamp};
use crate::error::{Error, Result};
use crate::fabric::{MessageBus, MessageConsumer, MessageProvider, MessageQueue};
use crate::net::TcpSocket;
use crate::sync::WaitCondition;

/// Default pause between connection attempts.
pub const DEFAULT_AWAITING_CONNECTION_TIMEOUT: Timeout = Timeout::new(1, 0);

/// Wire-side receive callbacks of a broker's receiver thread/task.
pub trait ReceiverHandler<M>: Send + 'static {
    /// Decode one message from the socket.
    ///
    /// `Ok(None)` means nothing complete arrived within `timeout`; a lost
    /// peer must surface as [`Error::ConnectionAborted`].
    fn receive(&mut self, socket: &TcpSocket, timeout: Timeout) -> Result<Option<M>>;

    /// The connection is up (outbound connect or inbound accept).
    fn on_connected(&mut self) {}

    /// The connection went down; `aborted` = lost rather than closed locally.
    fn on_disconnected(&mut self, _aborted: bool) {}

    /// A connection attempt failed (outbound variant only).
    fn on_connect_error(&mut self, _error: &Error) {}

    /// Filter an incoming message; `false` discards it.
    fn on_receive(&mut self, _msg: &M) -> bool {
        true
    }
}

/// Wire-side send callbacks of a broker's sender thread/task.
pub trait SenderHandler<M>: Send + 'static {
    /// Write `msg` to the socket.
    ///
    /// `Ok(false)` means partially sent — the broker calls again with the
    /// same message until `Ok(true)`.
    fn send(&mut self, socket: &TcpSocket, msg: &M, timeout: Timeout) -> Result<bool>;

    /// The sender learned the connection is up (listening variant).
    fn on_connected(&mut self) {}

    /// The sender observed the connection go down.
    fn on_disconnected(&mut self, _aborted: bool) {}

    /// Filter a consumed message; `false` discards it.
    fn on_consume(&mut self, _msg: &M) -> bool {
        true
    }

    /// A message was fully sent.
    fn on_sent(&mut self, _msg: &M) {}
}

// ─── Fabric wiring ──────────────────────────────────────────────────────────

/// A broker's message fabric: input queue + output bus.
///
/// Either side may be constructed internally or supplied externally (shared
/// with other subsystems); the broker references both through `Arc` either
/// way.
pub struct BrokerFabric<M: Clone> {
    input_queue: Arc<MessageQueue<M>>,
    output_bus: Arc<MessageBus<M>>,
}

impl<M: Clone> BrokerFabric<M> {
    /// Internally constructed queue and bus.
    #[must_use]
    pub fn new() -> Self {
        BrokerFabric {
            input_queue: Arc::new(MessageQueue::new()),
            output_bus: Arc::new(MessageBus::new()),
        }
    }

    /// External input queue, internal output bus.
    #[must_use]
    pub fn with_queue(input_queue: Arc<MessageQueue<M>>) -> Self {
        BrokerFabric {
            input_queue,
            output_bus: Arc::new(MessageBus::new()),
        }
    }

    /// Internal input queue, external output bus.
    #[must_use]
    pub fn with_bus(output_bus: Arc<MessageBus<M>>) -> Self {
        BrokerFabric {
            input_queue: Arc::new(MessageQueue::new()),
            output_bus,
        }
    }

    /// Both sides supplied externally.
    #[must_use]
    pub fn with_parts(input_queue: Arc<MessageQueue<M>>, output_bus: Arc<MessageBus<M>>) -> Self {
        BrokerFabric {
            input_queue,
            output_bus,
        }
    }

    /// Messages queued for sending.
    #[must_use]
    pub fn input_queue(&self) -> &Arc<MessageQueue<M>> {
        &self.input_queue
    }

    /// Broadcast point for received messages.
    #[must_use]
    pub fn output_bus(&self) -> &Arc<MessageBus<M>> {
        &self.output_bus
    }
}

impl<M: Clone> Default for BrokerFabric<M> {
    fn default() -> Self {
        BrokerFabric::new()
    }
}

/// State shared between a broker's receiver and sender threads.
pub(crate) struct BrokerCore<M: Clone> {
    pub(crate) fabric: BrokerFabric<M>,
    pub(crate) providers: RwLock<Vec<Arc<dyn MessageProvider<M>>>>,
    pub(crate) consumers: RwLock<Vec<Arc<dyn MessageConsumer<M>>>>,
    pub(crate) listening_queue_timeout: Timeout,
    pub(crate) awaiting_connection_timeout: Timeout,
    terminate: AtomicBool,
    sleep_cond: WaitCondition,
    /// Writable dup of the connected socket, installed by the receiver.
    pub(crate) socket_slot: Mutex<Option<TcpSocket>>,
}

impl<M: Clone> BrokerCore<M> {
    pub(crate) fn new(fabric: BrokerFabric<M>) -> Arc<Self> {
        Arc::new(BrokerCore {
            fabric,
            providers: RwLock::new(Vec::new()),
            consumers: RwLock::new(Vec::new()),
            listening_queue_timeout: Timeout::default_timeout(),
            awaiting_connection_timeout: DEFAULT_AWAITING_CONNECTION_TIMEOUT,
            terminate: AtomicBool::new(false),
            sleep_cond: WaitCondition::new(),
            socket_slot: Mutex::new(None),
        })
    }

    pub(crate) fn terminated(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }

    /// Flag termination and interrupt any broker sleep.
    pub(crate) fn set_terminate(&self) {
        self.terminate.store(true, Ordering::Release);
        let _guard = self.sleep_cond.lock();
        self.sleep_cond.wake_all();
    }

    pub(crate) fn clear_terminate(&self) {
        self.terminate.store(false, Ordering::Release);
    }

    /// Sleep up to `timeout`, returning early when termination is flagged.
    pub(crate) fn sleep_interruptible(&self, timeout: Timeout) {
        let limit = Timestamp::limit(timeout);
        loop {
            if self.terminated() || limit.expired() {
                return;
            }
            let guard = self.sleep_cond.lock();
            if self.terminated() {
                return;
            }
            let (_guard, _signalled) = self.sleep_cond.wait_until(guard, limit);
        }
    }

    pub(crate) fn install_socket(&self, socket: TcpSocket) {
        *self.socket_slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(socket);
    }

    pub(crate) fn clear_socket(&self) {
        *self.socket_slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// A fresh dup of the currently connected socket, if any.
    pub(crate) fn clone_socket(&self) -> Option<TcpSocket> {
        self.socket_slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(|s| s.try_clone().ok())
    }

    pub(crate) fn provider_snapshot(&self) -> Vec<Arc<dyn MessageProvider<M>>> {
        self.providers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn consumer_snapshot(&self) -> Vec<Arc<dyn MessageConsumer<M>>> {
        self.consumers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

// ─── Canonical line-delimited text transport ────────────────────────────────

/// Receiver for LF- or CRLF-terminated text lines (`M = String`).
#[derive(Default)]
pub struct LineReceiver {
    buffer: Vec<u8>,
}

impl LineReceiver {
    /// Empty decoder.
    #[must_use]
    pub fn new() -> Self {
        LineReceiver::default()
    }

    fn take_line(&mut self) -> Option<String> {
        let lf = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=lf).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

impl ReceiverHandler<String> for LineReceiver {
    fn receive(&mut self, socket: &TcpSocket, timeout: Timeout) -> Result<Option<String>> {
        if let Some(line) = self.take_line() {
            return Ok(Some(line));
        }
        let mut chunk = [0u8; 1024];
        let n = socket.read(&mut chunk, timeout)?;
        if n == 0 {
            return Ok(None);
        }
        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(self.take_line())
    }
}

/// Sender writing each message as one LF-terminated line.
#[derive(Default)]
pub struct LineSender {
    wire: Vec<u8>,
    sent: usize,
}

impl LineSender {
    /// Empty encoder.
    #[must_use]
    pub fn new() -> Self {
        LineSender::default()
    }
}

impl SenderHandler<String> for LineSender {
    fn send(&mut self, socket: &TcpSocket, msg: &String, timeout: Timeout) -> Result<bool> {
        if self.wire.is_empty() {
            self.wire.extend_from_slice(msg.as_bytes());
            self.wire.push(b'\n');
            self.sent = 0;
        }
        let n = match socket.write(&self.wire[self.sent..], timeout) {
            Ok(n) => n,
            Err(e) => {
                // The message will be retried whole on a fresh connection.
                self.wire.clear();
                self.sent = 0;
                return Err(e);
            }
        };
        self.sent += n;
        if self.sent >= self.wire.len() {
            self.wire.clear();
            self.sent = 0;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
