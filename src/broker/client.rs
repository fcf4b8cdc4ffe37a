//! Outbound message broker connection.
//!
//! Keeps one TCP connection to a remote peer alive: the receiver thread
//! connects (and reconnects after an abort, pausing
//! `awaiting_connection_timeout` between attempts), decodes messages and
//! broadcasts them; the sender thread drains the input queue and writes. A
//! message popped before an abort is retried once the connection is back.
//!
//! All pauses wait on the termination condition, so `stop()` never has to
//! ride out a full backoff window.

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
use crate::subsystem::SubsystemUnit;

/// Persistent outbound broker connection.
pub struct MessageBrokerConnection<M, R, S>
where
    M: Clone + Send + 'static,
    R: ReceiverHandler<M>,
    S: SenderHandler<M>,
{
    name: String,
    remote: TcpAddrInfo,
    core: Arc<BrokerCore<M>>,
    receiver_handler: Arc<Mutex<R>>,
    sender_handler: Arc<Mutex<S>>,
    threads: Vec<JoinHandle<()>>,
}

impl<M, R, S> MessageBrokerConnection<M, R, S>
where
    M: Clone + Send + 'static,
    R: ReceiverHandler<M>,
    S: SenderHandler<M>,
{
    /// Connection with an internally constructed fabric.
    #[must_use]
    pub fn new(name: impl Into<String>, remote: TcpAddrInfo, receiver: R, sender: S) -> Self {
        MessageBrokerConnection::with_fabric(name, remote, receiver, sender, BrokerFabric::new())
    }

    /// Connection around an explicit fabric (externally shared queue/bus).
    #[must_use]
    pub fn with_fabric(
        name: impl Into<String>,
        remote: TcpAddrInfo,
        receiver: R,
        sender: S,
        fabric: BrokerFabric<M>,
    ) -> Self {
        MessageBrokerConnection {
            name: name.into(),
            remote,
            core: BrokerCore::new(fabric),
            receiver_handler: Arc::new(Mutex::new(receiver)),
            sender_handler: Arc::new(Mutex::new(sender)),
            threads: Vec::new(),
        }
    }

    /// Pause between reconnection attempts (default 1 s). Stopped broker only.
    pub fn set_awaiting_connection_timeout(&mut self, timeout: Timeout) -> Result<()> {
        let core = Arc::get_mut(&mut self.core)
            .ok_or(Error::InvalidState("broker is running"))?;
        core.awaiting_connection_timeout = timeout;
        Ok(())
    }

    /// Receive/pop deadline of one loop iteration (default 100 ms).
    pub fn set_listening_queue_timeout(&mut self, timeout: Timeout) -> Result<()> {
        let core = Arc::get_mut(&mut self.core)
            .ok_or(Error::InvalidState("broker is running"))?;
        core.listening_queue_timeout = timeout;
        Ok(())
    }

    /// Register a provider whose messages this broker sends. Takes effect on
    /// the next start.
    pub fn add_provider(&self, provider: Arc<dyn MessageProvider<M>>) {
        self.core
            .providers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(provider);
    }

    /// Register a consumer that receives every incoming message. Takes
    /// effect on the next start.
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

    /// The input queue (to subscribe to providers manually).
    #[must_use]
    pub fn input_queue(&self) -> Arc<MessageQueue<M>> {
        Arc::clone(self.core.fabric.input_queue())
    }

    /// The output bus broadcasting received messages.
    #[must_use]
    pub fn output_bus(&self) -> Arc<MessageBus<M>> {
        Arc::clone(self.core.fabric.output_bus())
    }
}

impl<M, R, S> SubsystemUnit for MessageBrokerConnection<M, R, S>
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
            let remote = self.remote.clone();
            let handler = Arc::clone(&self.receiver_handler);
            std::thread::Builder::new()
                .name(format!("{name}-receiver"))
                .spawn(move || run_receiver(&name, &core, &remote, &handler))
                .map_err(|e| Error::from_syscall("spawn", e))?
        };
        self.threads.push(receiver);

        let sender = {
            let name = self.name.clone();
            let core = Arc::clone(&self.core);
            let handler = Arc::clone(&self.sender_handler);
            std::thread::Builder::new()
                .name(format!("{name}-sender"))
                .spawn(move || run_sender(&name, &core, &handler))
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
        self.core.set_terminate();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        log::debug!("[Broker] {} has been stopped", self.name);
    }
}

impl<M, R, S> Drop for MessageBrokerConnection<M, R, S>
where
    M: Clone + Send + 'static,
    R: ReceiverHandler<M>,
    S: SenderHandler<M>,
{
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_receiver<M, R>(
    name: &str,
    core: &Arc<BrokerCore<M>>,
    remote: &TcpAddrInfo,
    handler: &Arc<Mutex<R>>,
) where
    M: Clone + Send + 'static,
    R: ReceiverHandler<M>,
{
    let mut handler = handler.lock().unwrap_or_else(|e| e.into_inner());
    let consumers = core.consumer_snapshot();
    let mut socket = TcpSocket::new();
    log::debug!("[Broker] {name}: receiver thread has been started");

    loop {
        if core.terminated() {
            log::debug!("[Broker] {name}: termination detected -> leaving receiver loop");
            break;
        }
        if socket.connected() {
            match handler.receive(&socket, core.listening_queue_timeout) {
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
                    log::error!(
                        "[Broker] {name}: receiving data from {} error: {e} -> reestablishing connection",
                        remote.spec()
                    );
                    core.clear_socket();
                    socket.close();
                    handler.on_disconnected(true);
                }
            }
        } else {
            if !socket.is_open() {
                if let Err(e) = socket.open(remote.family()) {
                    log::error!("[Broker] {name}: could not open a socket: {e}");
                    core.sleep_interruptible(core.awaiting_connection_timeout);
                    continue;
                }
            }
            match socket.connect(remote, core.awaiting_connection_timeout) {
                Ok(()) => {
                    match socket.try_clone() {
                        Ok(dup) => core.install_socket(dup),
                        Err(e) => log::error!("[Broker] {name}: could not share the socket: {e}"),
                    }
                    crate::access!("[Broker] {name}: connected to {}", remote.spec());
                    handler.on_connected();
                }
                Err(e) => {
                    handler.on_connect_error(&e);
                    log::error!(
                        "[Broker] {name}: connecting to {} error: {e}",
                        remote.spec()
                    );
                    socket.close();
                    core.sleep_interruptible(core.awaiting_connection_timeout);
                }
            }
        }
    }
    if socket.connected() {
        core.clear_socket();
        socket.close();
        handler.on_disconnected(false);
        log::debug!("[Broker] {name}: socket has been closed");
    }
}

fn run_sender<M, S>(name: &str, core: &Arc<BrokerCore<M>>, handler: &Arc<Mutex<S>>)
where
    M: Clone + Send + 'static,
    S: SenderHandler<M>,
{
    let mut handler = handler.lock().unwrap_or_else(|e| e.into_inner());
    log::debug!("[Broker] {name}: sender thread has been started");

    // The input queue consumes from every registered provider while the
    // sender runs; dropping the set on exit releases the bindings.
    let providers = core.provider_snapshot();
    let mut subscriptions = SubscriptionSet::new();
    for provider in &providers {
        subscriptions.add(Subscription::from_dyn(
            provider,
            Arc::clone(core.fabric.input_queue()) as Arc<dyn MessageConsumer<M>>,
        ));
    }

    let mut consume_buffer: MessageBuffer<M> = MessageBuffer::new();
    let mut current: Option<M> = None;

    loop {
        if core.terminated() {
            log::debug!("[Broker] {name}: termination detected -> leaving sender loop");
            break;
        }
        if let Some(msg) = &current {
            // Re-acquire the shared socket per attempt: the receiver clears
            // the slot the moment it observes an abort, so a stale handle is
            // never written into a connection known to be dead.
            let Some(sock) = core.clone_socket() else {
                // Not connected: hold the message and wait.
                core.sleep_interruptible(core.awaiting_connection_timeout);
                continue;
            };
            match handler.send(&sock, msg, core.listening_queue_timeout) {
                Ok(true) => {
                    handler.on_sent(msg);
                    current = None;
                }
                Ok(false) => {
                    // Partially sent; keep calling with the same message.
                }
                Err(e) => {
                    log::error!("[Broker] {name}: sending data error: {e}");
                    core.sleep_interruptible(core.awaiting_connection_timeout);
                }
            }
        } else if consume_buffer.is_empty() {
            let fetched = core
                .fabric
                .input_queue()
                .pop_all(&mut consume_buffer, Timestamp::limit(core.listening_queue_timeout));
            if fetched > 0 {
                log::debug!("[Broker] {name}: {fetched} message(s) fetched from the input queue");
            }
        } else if let Some(msg) = consume_buffer.pop() {
            if handler.on_consume(&msg) {
                current = Some(msg);
            } else {
                log::debug!("[Broker] {name}: message rejected by the on-consume handler");
            }
        }
    }
}
