//! Single-peer inbound message broker connection.
//!
//! The receiver thread owns the listening socket: bind, `listen(1)`, then a
//! `clock_timeout`-bounded accept poll. The sender thread idles on its own
//! requester until the receiver announces a peer:
//!
//! | event                  | receiver / sender      | action                       |
//! |------------------------|------------------------|------------------------------|
//! | start                  | Listening / Idle       | open, bind, listen           |
//! | accepted               | Connected / Connected  | `ConnectRequest` + Ok        |
//! | read ConnectionAborted | Listening / Idle       | `DisconnectRequest` + Ok     |
//! | write ConnectionAborted| sender pauses          | waits for the next Connect   |
//! | stop                   | Idle / Idle            | `TerminationRequest` to both |
//!
//! Stop sends `TerminationRequest` to the sender first, then the receiver,
//! awaits an `OkResponse` from each within
//! `clock_timeout × await_response_ticks`, then joins.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::broker::{BrokerCore, BrokerFabric, ReceiverHandler, SenderHandler};
use crate::clock::{Timeout, Timestamp};
use crate::error::{Error, Result};
use crate::fabric::{
    MessageBus, MessageConsumer, MessageProvider, MessageQueue, MessageBuffer, Subscription,
    SubscriptionSet,
};
use crate::net::{TcpAddrInfo, TcpSocket};
use crate::requester::{InterThreadRequester, PendingRequest, ThreadMessage};
use crate::subsystem::{SubsystemUnit, DEFAULT_AWAIT_RESPONSE_TICKS};

/// Single-client listening broker connection.
pub struct MessageBrokerListener<M, R, S>
where
    M: Clone + Send + 'static,
    R: ReceiverHandler<M>,
    S: SenderHandler<M>,
{
    name: String,
    local: TcpAddrInfo,
    clock_timeout: Timeout,
    await_response_ticks: u32,
    core: Arc<BrokerCore<M>>,
    receiver_requester: Arc<InterThreadRequester<ThreadMessage>>,
    sender_requester: Arc<InterThreadRequester<ThreadMessage>>,
    receiver_handler: Arc<Mutex<R>>,
    sender_handler: Arc<Mutex<S>>,
    threads: Vec<JoinHandle<()>>,
}

impl<M, R, S> MessageBrokerListener<M, R, S>
where
    M: Clone + Send + 'static,
    R: ReceiverHandler<M>,
    S: SenderHandler<M>,
{
    /// Listener with an internally constructed fabric.
    #[must_use]
    pub fn new(name: impl Into<String>, local: TcpAddrInfo, receiver: R, sender: S) -> Self {
        MessageBrokerListener::with_fabric(name, local, receiver, sender, BrokerFabric::new())
    }

    /// Listener around an explicit fabric.
    #[must_use]
    pub fn with_fabric(
        name: impl Into<String>,
        local: TcpAddrInfo,
        receiver: R,
        sender: S,
        fabric: BrokerFabric<M>,
    ) -> Self {
        MessageBrokerListener {
            name: name.into(),
            local,
            clock_timeout: Timeout::default_timeout(),
            await_response_ticks: DEFAULT_AWAIT_RESPONSE_TICKS,
            core: BrokerCore::new(fabric),
            receiver_requester: Arc::new(InterThreadRequester::new()),
            sender_requester: Arc::new(InterThreadRequester::new()),
            receiver_handler: Arc::new(Mutex::new(receiver)),
            sender_handler: Arc::new(Mutex::new(sender)),
            threads: Vec::new(),
        }
    }

    /// Accept/idle poll cadence (default 100 ms). Stopped broker only.
    pub fn set_clock_timeout(&mut self, timeout: Timeout) -> Result<()> {
        if !self.threads.is_empty() {
            return Err(Error::InvalidState("broker is running"));
        }
        self.clock_timeout = timeout;
        Ok(())
    }

    /// Register a provider whose messages this broker sends.
    pub fn add_provider(&self, provider: Arc<dyn MessageProvider<M>>) {
        self.core
            .providers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(provider);
    }

    /// Register a consumer receiving every incoming message.
    pub fn add_consumer(&self, consumer: Arc<dyn MessageConsumer<M>>) {
        self.core
            .consumers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(consumer);
    }

    /// Queue one message for sending. `false` on input-queue overflow.
    pub fn send_message(&self, msg: M) -> bool {
        self.core.fabric.input_queue().push(msg)
    }

    /// The input queue.
    #[must_use]
    pub fn input_queue(&self) -> Arc<MessageQueue<M>> {
        Arc::clone(self.core.fabric.input_queue())
    }

    /// The output bus broadcasting received messages.
    #[must_use]
    pub fn output_bus(&self) -> Arc<MessageBus<M>> {
        Arc::clone(self.core.fabric.output_bus())
    }

    fn await_termination_ok(&self, requester: &InterThreadRequester<ThreadMessage>, id: usize, role: &str) {
        if id == 0 {
            log::error!(
                "[Broker] {}: could not send termination request to the {role} thread",
                self.name
            );
            return;
        }
        let limit = Timestamp::limit(self.clock_timeout * self.await_response_ticks);
        match requester.await_response(id, limit) {
            Some(ThreadMessage::OkResponse) => {
                log::debug!("[Broker] {}: {role} thread acknowledged termination", self.name);
            }
            Some(other) => {
                log::error!(
                    "[Broker] {}: invalid termination response from the {role} thread: {other:?}",
                    self.name
                );
            }
            None => {
                log::error!(
                    "[Broker] {}: no response to termination request from the {role} thread",
                    self.name
                );
            }
        }
    }
}

impl<M, R, S> SubsystemUnit for MessageBrokerListener<M, R, S>
where
    M: Clone + Send + 'static,
    R: ReceiverHandler<M>,
    S: SenderHandler<M>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<()> {
        if !self.threads.is_empty() {
            return Err(Error::InvalidState("broker is already started"));
        }
        self.core.clear_terminate();

        let receiver = {
            let name = self.name.clone();
            let core = Arc::clone(&self.core);
            let local = self.local.clone();
            let clock_timeout = self.clock_timeout;
            let own = Arc::clone(&self.receiver_requester);
            let peer = Arc::clone(&self.sender_requester);
            let handler = Arc::clone(&self.receiver_handler);
            let response_limit = self.clock_timeout * self.await_response_ticks;
            std::thread::Builder::new()
                .name(format!("{name}-receiver"))
                .spawn(move || {
                    run_receiver(&name, &core, &local, clock_timeout, response_limit, &own, &peer, &handler);
                })
                .map_err(|e| Error::from_syscall("spawn", e))?
        };
        self.threads.push(receiver);

        let sender = {
            let name = self.name.clone();
            let core = Arc::clone(&self.core);
            let clock_timeout = self.clock_timeout;
            let own = Arc::clone(&self.sender_requester);
            let handler = Arc::clone(&self.sender_handler);
            std::thread::Builder::new()
                .name(format!("{name}-sender"))
                .spawn(move || run_sender(&name, &core, clock_timeout, &own, &handler))
                .map_err(|e| Error::from_syscall("spawn", e))?
        };
        self.threads.push(sender);

        log::debug!("[Broker] {} has been started", self.name);
        Ok(())
    }

    fn stop(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        let sender_id = self.sender_requester.send_request(ThreadMessage::TerminationRequest);
        let receiver_id = self
            .receiver_requester
            .send_request(ThreadMessage::TerminationRequest);
        // Interrupt any backoff sleeps so the requests are seen promptly.
        self.core.set_terminate();
        self.await_termination_ok(&self.sender_requester, sender_id, "sender");
        self.await_termination_ok(&self.receiver_requester, receiver_id, "receiver");
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        log::debug!("[Broker] {} has been stopped", self.name);
    }
}

impl<M, R, S> Drop for MessageBrokerListener<M, R, S>
where
    M: Clone + Send + 'static,
    R: ReceiverHandler<M>,
    S: SenderHandler<M>,
{
    fn drop(&mut self) {
        self.stop();
    }
}

/// Answer a control request addressed to a broker thread. Returns `true`
/// when it was a termination request.
fn acknowledge(
    requester: &InterThreadRequester<ThreadMessage>,
    pending: &mut PendingRequest<ThreadMessage>,
) -> bool {
    let termination = matches!(pending.request(), ThreadMessage::TerminationRequest);
    if pending.response_required() {
        requester.send_response(pending, ThreadMessage::OkResponse);
    }
    termination
}

#[allow(clippy::too_many_arguments)]
fn run_receiver<M, R>(
    name: &str,
    core: &Arc<BrokerCore<M>>,
    local: &TcpAddrInfo,
    clock_timeout: Timeout,
    response_limit: Timeout,
    own: &Arc<InterThreadRequester<ThreadMessage>>,
    sender: &Arc<InterThreadRequester<ThreadMessage>>,
    handler: &Arc<Mutex<R>>,
) where
    M: Clone + Send + 'static,
    R: ReceiverHandler<M>,
{
    let mut handler = handler.lock().unwrap_or_else(|e| e.into_inner());
    let consumers = core.consumer_snapshot();
    log::debug!("[Broker] {name}: receiver thread has been started");

    let mut listener = TcpSocket::new();
    let bound = listener
        .open(local.family())
        .and_then(|()| listener.bind(local))
        .and_then(|()| listener.listen(1));
    if let Err(e) = bound {
        log::error!("[Broker] {name}: could not listen on {}: {e}", local.spec());
        // Stay alive to answer the termination handshake.
        loop {
            if let Some(mut pending) = own.await_request(Timestamp::limit(clock_timeout)) {
                if acknowledge(own, &mut pending) {
                    return;
                }
            }
        }
    }
    log::debug!("[Broker] {name}: listening on {}", local.spec());

    let mut peer_socket: Option<TcpSocket> = None;
    let mut accept_attempts: usize = 0;

    /// Tell the sender about a connection event and await its Ok.
    fn notify_sender(
        name: &str,
        sender: &InterThreadRequester<ThreadMessage>,
        message: ThreadMessage,
        response_limit: Timeout,
    ) {
        let id = sender.send_request(message);
        if id == 0 {
            log::error!("[Broker] {name}: could not send {message:?} to the sender thread");
            return;
        }
        match sender.await_response(id, Timestamp::limit(response_limit)) {
            Some(ThreadMessage::OkResponse) => {}
            other => {
                log::error!(
                    "[Broker] {name}: unexpected response to {message:?} from the sender thread: {other:?}"
                );
            }
        }
    }

    'run: loop {
        // Control requests come first (termination during accept or receive).
        while let Some(mut pending) = own.fetch_request() {
            if acknowledge(own, &mut pending) {
                break 'run;
            }
        }

        if let Some(peer) = &peer_socket {
            match handler.receive(peer, clock_timeout) {
                Ok(Some(msg)) => {
                    if handler.on_receive(&msg) {
                        core.fabric.output_bus().push(&msg);
                        for consumer in &consumers {
                            consumer.push(msg.clone());
                        }
                    } else {
                        log::debug!("[Broker] {name}: message rejected by the on-receive handler");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!("[Broker] {name}: receiving data error: {e} -> re-accepting");
                    core.clear_socket();
                    peer_socket = None;
                    notify_sender(name, sender, ThreadMessage::DisconnectRequest, response_limit);
                    handler.on_disconnected(true);
                }
            }
        } else {
            match listener.accept(clock_timeout) {
                Ok(Some(peer)) => {
                    accept_attempts = 0;
                    crate::access!(
                        "[Broker] {name}: connection accepted from {}",
                        peer.remote_addr().map_or_else(|| "unknown".to_string(), |a| a.to_string())
                    );
                    match peer.try_clone() {
                        Ok(dup) => core.install_socket(dup),
                        Err(e) => log::error!("[Broker] {name}: could not share the socket: {e}"),
                    }
                    peer_socket = Some(peer);
                    notify_sender(name, sender, ThreadMessage::ConnectRequest, response_limit);
                    handler.on_connected();
                }
                Ok(None) => {
                    accept_attempts += 1;
                }
                Err(e) => {
                    log::error!(
                        "[Broker] {name}: accepting connection error after {accept_attempts} attempts: {e}"
                    );
                    core.sleep_interruptible(clock_timeout);
                }
            }
        }
    }

    if peer_socket.take().is_some() {
        core.clear_socket();
        handler.on_disconnected(false);
    }
    log::debug!("[Broker] {name}: receiver thread has been terminated");
}

fn run_sender<M, S>(
    name: &str,
    core: &Arc<BrokerCore<M>>,
    clock_timeout: Timeout,
    own: &Arc<InterThreadRequester<ThreadMessage>>,
    handler: &Arc<Mutex<S>>,
) where
    M: Clone + Send + 'static,
    S: SenderHandler<M>,
{
    let mut handler = handler.lock().unwrap_or_else(|e| e.into_inner());
    log::debug!("[Broker] {name}: sender thread has been started");

    let providers = core.provider_snapshot();
    let mut subscriptions = SubscriptionSet::new();
    for provider in &providers {
        subscriptions.add(Subscription::from_dyn(
            provider,
            Arc::clone(core.fabric.input_queue()) as Arc<dyn MessageConsumer<M>>,
        ));
    }

    let mut connected = false;
    let mut consume_buffer: MessageBuffer<M> = MessageBuffer::new();
    let mut current: Option<M> = None;

    'run: loop {
        if connected {
            // Drain control requests without blocking while traffic flows.
            while let Some(mut pending) = own.fetch_request() {
                match pending.request() {
                    ThreadMessage::DisconnectRequest => {
                        connected = false;
                        handler.on_disconnected(true);
                    }
                    ThreadMessage::ConnectRequest => {}
                    _ => {}
                }
                if acknowledge(own, &mut pending) {
                    break 'run;
                }
            }
            if !connected {
                continue;
            }
        } else {
            // Idle: await the next connection event at the clock cadence.
            match own.await_request(Timestamp::limit(clock_timeout)) {
                Some(mut pending) => {
                    match pending.request() {
                        ThreadMessage::ConnectRequest => {
                            connected = true;
                            handler.on_connected();
                        }
                        ThreadMessage::DisconnectRequest => {}
                        _ => {}
                    }
                    if acknowledge(own, &mut pending) {
                        break 'run;
                    }
                }
                None => continue,
            }
            continue;
        }

        if let Some(msg) = &current {
            // Per-attempt dup of the shared socket; cleared centrally on
            // disconnect.
            let Some(sock) = core.clone_socket() else {
                core.sleep_interruptible(clock_timeout);
                continue;
            };
            match handler.send(&sock, msg, clock_timeout) {
                Ok(true) => {
                    handler.on_sent(msg);
                    current = None;
                }
                Ok(false) => {}
                Err(e) => {
                    log::error!("[Broker] {name}: sending data error: {e} -> pausing until re-accept");
                    connected = false;
                    handler.on_disconnected(true);
                }
            }
        } else if consume_buffer.is_empty() {
            core.fabric
                .input_queue()
                .pop_all(&mut consume_buffer, Timestamp::limit(clock_timeout));
        } else if let Some(msg) = consume_buffer.pop() {
            if handler.on_consume(&msg) {
                current = Some(msg);
            } else {
                log::debug!("[Broker] {name}: message rejected by the on-consume handler");
            }
        }
    }
    log::debug!("[Broker] {name}: sender thread has been terminated");
}
