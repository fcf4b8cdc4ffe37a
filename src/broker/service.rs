//! Many-client message broker service.
//!
//! An accept thread polls the listening socket at the clock cadence and
//! hands every accepted connection to a [`MultiTaskDispatcher`] as a pair of
//! methods — receiver and sender — sharing one [`ConnectionStaff`]. The pool
//! holds `2 × max_clients` workers with no overflow allowance, which bounds
//! concurrent connections to `max_clients`; a connection that cannot be
//! admitted is closed and logged at warning level.
//!
//! Either side of a pair can tear the connection down by flagging the shared
//! staff; the sibling observes the flag within one poll interval. Received
//! messages go to every globally registered consumer plus the connection's
//! own output bus; the connection's input queue consumes from every globally
//! registered provider for the connection's lifetime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

use crate::broker::{ReceiverHandler, SenderHandler};
use crate::clock::{Timeout, Timestamp};
use crate::dispatch::{MultiTaskDispatcher, TaskMethod, Worker};
use crate::error::{Error, Result};
use crate::fabric::{
    MessageBus, MessageConsumer, MessageProvider, MessageQueue, MessageBuffer, Subscription,
    SubscriptionSet,
};
use crate::net::{TcpAddrInfo, TcpSocket};
use crate::subsystem::SubsystemUnit;

/// Per-connection state shared by the receiver/sender task pair.
pub struct ConnectionStaff<M: Clone> {
    socket: TcpSocket,
    input_queue: Arc<MessageQueue<M>>,
    output_bus: Arc<MessageBus<M>>,
    terminate: AtomicBool,
}

impl<M: Clone> ConnectionStaff<M> {
    fn new(socket: TcpSocket) -> Self {
        ConnectionStaff {
            socket,
            input_queue: Arc::new(MessageQueue::new()),
            output_bus: Arc::new(MessageBus::new()),
            terminate: AtomicBool::new(false),
        }
    }

    /// The accepted peer socket.
    #[must_use]
    pub fn socket(&self) -> &TcpSocket {
        &self.socket
    }

    /// Messages queued for this connection's sender.
    #[must_use]
    pub fn input_queue(&self) -> &Arc<MessageQueue<M>> {
        &self.input_queue
    }

    /// Broadcast point for this connection's received messages.
    #[must_use]
    pub fn output_bus(&self) -> &Arc<MessageBus<M>> {
        &self.output_bus
    }

    /// Ask both tasks of the pair to tear the connection down.
    pub fn appoint_termination(&self) {
        self.terminate.store(true, Ordering::Release);
    }

    /// True once either task flagged teardown.
    #[must_use]
    pub fn should_terminate(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }
}

struct ServiceShared<M: Clone> {
    providers: RwLock<Vec<Arc<dyn MessageProvider<M>>>>,
    consumers: RwLock<Vec<Arc<dyn MessageConsumer<M>>>>,
    listening_queue_timeout: Timeout,
}

impl<M: Clone> ServiceShared<M> {
    fn provider_snapshot(&self) -> Vec<Arc<dyn MessageProvider<M>>> {
        self.providers.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn consumer_snapshot(&self) -> Vec<Arc<dyn MessageConsumer<M>>> {
        self.consumers.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Many-client broker service.
pub struct MessageBrokerService<M, R, S, F>
where
    M: Clone + Send + 'static,
    R: ReceiverHandler<M>,
    S: SenderHandler<M>,
    F: Fn() -> (R, S) + Send + Sync + 'static,
{
    name: String,
    local: TcpAddrInfo,
    max_clients: usize,
    clock_timeout: Timeout,
    shared: Arc<ServiceShared<M>>,
    factory: Arc<F>,
    dispatcher: Arc<MultiTaskDispatcher<ConnectionStaff<M>>>,
    accept_terminate: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl<M, R, S, F> MessageBrokerService<M, R, S, F>
where
    M: Clone + Send + 'static,
    R: ReceiverHandler<M>,
    S: SenderHandler<M>,
    F: Fn() -> (R, S) + Send + Sync + 'static,
{
    /// Service accepting up to `max_clients` concurrent connections.
    ///
    /// `factory` builds the receiver/sender handler pair for each accepted
    /// connection.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        local: TcpAddrInfo,
        max_clients: usize,
        factory: F,
    ) -> Self {
        let name = name.into();
        let dispatcher = MultiTaskDispatcher::new(format!("{name}-pool"), 2 * max_clients, 0);
        MessageBrokerService {
            name,
            local,
            max_clients,
            clock_timeout: Timeout::default_timeout(),
            shared: Arc::new(ServiceShared {
                providers: RwLock::new(Vec::new()),
                consumers: RwLock::new(Vec::new()),
                listening_queue_timeout: Timeout::default_timeout(),
            }),
            factory: Arc::new(factory),
            dispatcher: Arc::new(dispatcher),
            accept_terminate: Arc::new(AtomicBool::new(false)),
            accept_thread: None,
        }
    }

    /// Accept poll cadence (default 100 ms). Stopped service only.
    pub fn set_clock_timeout(&mut self, timeout: Timeout) -> Result<()> {
        if self.accept_thread.is_some() {
            return Err(Error::InvalidState("service is running"));
        }
        self.clock_timeout = timeout;
        Ok(())
    }

    /// Register a provider every connection's input queue subscribes to.
    pub fn add_provider(&self, provider: Arc<dyn MessageProvider<M>>) {
        self.shared
            .providers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(provider);
    }

    /// Register a consumer receiving every message from every connection.
    pub fn add_consumer(&self, consumer: Arc<dyn MessageConsumer<M>>) {
        self.shared
            .consumers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(consumer);
    }

    /// Configured connection bound.
    #[must_use]
    pub fn max_clients(&self) -> usize {
        self.max_clients
    }
}

impl<M, R, S, F> SubsystemUnit for MessageBrokerService<M, R, S, F>
where
    M: Clone + Send + 'static,
    R: ReceiverHandler<M>,
    S: SenderHandler<M>,
    F: Fn() -> (R, S) + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<()> {
        if self.accept_thread.is_some() {
            return Err(Error::InvalidState("service is already started"));
        }
        let mut listener = TcpSocket::new();
        listener.open(self.local.family())?;
        listener.bind(&self.local)?;
        listener.listen(self.max_clients as u32)?;
        log::debug!("[Service] {}: listening on {}", self.name, self.local.spec());

        Arc::get_mut(&mut self.dispatcher)
            .ok_or(Error::InvalidState("dispatcher is still referenced by a previous run"))?
            .start()?;
        self.accept_terminate.store(false, Ordering::Release);

        let name = self.name.clone();
        let clock_timeout = self.clock_timeout;
        let shared = Arc::clone(&self.shared);
        let factory = Arc::clone(&self.factory);
        let dispatcher = Arc::clone(&self.dispatcher);
        let terminate = Arc::clone(&self.accept_terminate);
        let handle = std::thread::Builder::new()
            .name(format!("{name}-accept"))
            .spawn(move || {
                run_accept_loop(&name, &listener, clock_timeout, &shared, &factory, &dispatcher, &terminate);
            })
            .map_err(|e| Error::from_syscall("spawn", e))?;
        self.accept_thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        let Some(handle) = self.accept_thread.take() else {
            return;
        };
        self.accept_terminate.store(true, Ordering::Release);
        let _ = handle.join();
        if let Some(dispatcher) = Arc::get_mut(&mut self.dispatcher) {
            dispatcher.stop();
        }
        log::debug!("[Service] {} has been stopped", self.name);
    }
}

impl<M, R, S, F> Drop for MessageBrokerService<M, R, S, F>
where
    M: Clone + Send + 'static,
    R: ReceiverHandler<M>,
    S: SenderHandler<M>,
    F: Fn() -> (R, S) + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_accept_loop<M, R, S, F>(
    name: &str,
    listener: &TcpSocket,
    clock_timeout: Timeout,
    shared: &Arc<ServiceShared<M>>,
    factory: &Arc<F>,
    dispatcher: &Arc<MultiTaskDispatcher<ConnectionStaff<M>>>,
    terminate: &Arc<AtomicBool>,
) where
    M: Clone + Send + 'static,
    R: ReceiverHandler<M>,
    S: SenderHandler<M>,
    F: Fn() -> (R, S) + Send + Sync + 'static,
{
    log::debug!("[Service] {name}: accept thread has been started");
    loop {
        if terminate.load(Ordering::Acquire) {
            break;
        }
        match listener.accept(clock_timeout) {
            Ok(Some(peer)) => {
                let peer_label = peer
                    .remote_addr()
                    .map_or_else(|| "unknown".to_string(), |a| a.to_string());
                let make_handlers = factory.as_ref();
                let (receiver, sender) = make_handlers();
                let staff = ConnectionStaff::new(peer);

                let receive_method: TaskMethod<ConnectionStaff<M>> = {
                    let shared = Arc::clone(shared);
                    Box::new(move |staff, worker| {
                        run_connection_receiver(staff, worker, receiver, &shared);
                    })
                };
                let send_method: TaskMethod<ConnectionStaff<M>> = {
                    let shared = Arc::clone(shared);
                    Box::new(move |staff, worker| {
                        run_connection_sender(staff, worker, sender, &shared);
                    })
                };

                if dispatcher
                    .perform(staff, vec![receive_method, send_method])
                    .is_err()
                {
                    // Dropping the refused staff closes the socket.
                    log::warn!(
                        "[Service] {name}: maximum clients reached, connection from {peer_label} refused"
                    );
                } else {
                    crate::access!("[Service] {name}: connection accepted from {peer_label}");
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::error!("[Service] {name}: accepting connection error: {e}");
                std::thread::sleep(clock_timeout.duration());
            }
        }
    }
    log::debug!("[Service] {name}: accept thread has been terminated");
}

fn run_connection_receiver<M, R>(
    staff: &ConnectionStaff<M>,
    worker: &Worker,
    mut handler: R,
    shared: &ServiceShared<M>,
) where
    M: Clone + Send + 'static,
    R: ReceiverHandler<M>,
{
    handler.on_connected();
    let consumers = shared.consumer_snapshot();
    loop {
        if worker.should_terminate() || staff.should_terminate() {
            handler.on_disconnected(false);
            break;
        }
        match handler.receive(&staff.socket, shared.listening_queue_timeout) {
            Ok(Some(msg)) => {
                if handler.on_receive(&msg) {
                    staff.output_bus.push(&msg);
                    for consumer in &consumers {
                        consumer.push(msg.clone());
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::debug!("[Service] connection receive ended: {e}");
                staff.appoint_termination();
                handler.on_disconnected(true);
                break;
            }
        }
    }
}

fn run_connection_sender<M, S>(
    staff: &ConnectionStaff<M>,
    worker: &Worker,
    mut handler: S,
    shared: &ServiceShared<M>,
) where
    M: Clone + Send + 'static,
    S: SenderHandler<M>,
{
    handler.on_connected();
    let providers = shared.provider_snapshot();
    let mut subscriptions = SubscriptionSet::new();
    for provider in &providers {
        subscriptions.add(Subscription::from_dyn(
            provider,
            Arc::clone(&staff.input_queue) as Arc<dyn MessageConsumer<M>>,
        ));
    }

    let mut consume_buffer: MessageBuffer<M> = MessageBuffer::new();
    let mut current: Option<M> = None;
    loop {
        if worker.should_terminate() || staff.should_terminate() {
            handler.on_disconnected(false);
            break;
        }
        if let Some(msg) = &current {
            match handler.send(&staff.socket, msg, shared.listening_queue_timeout) {
                Ok(true) => {
                    handler.on_sent(msg);
                    current = None;
                }
                Ok(false) => {}
                Err(e) => {
                    log::debug!("[Service] connection send ended: {e}");
                    staff.appoint_termination();
                    handler.on_disconnected(true);
                    break;
                }
            }
        } else if consume_buffer.is_empty() {
            staff
                .input_queue
                .pop_all(&mut consume_buffer, Timestamp::limit(shared.listening_queue_timeout));
        } else if let Some(msg) = consume_buffer.pop() {
            if handler.on_consume(&msg) {
                current = Some(msg);
            }
        }
    }
}
