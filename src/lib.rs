//! servkit — a toolkit for building long-running TCP services.
//!
//! A server is a hierarchy of cooperating [`subsystem`]s whose threads
//! coordinate start/stop over a shared clock; messages move through the
//! [`fabric`] (queues, buses, scoped subscriptions) with well-defined
//! backpressure; [`broker`]s bridge TCP connections to the fabric; [`http`]
//! supplies the canonical protocol implementation — an incremental HTTP/1.1
//! parser with buffered stream reader/writer.
//!
//! ```text
//! Server
//!   └── Subsystem (clock, threads, children)
//!         ├── OscillatorThread / SchedulerThread / WorkerThread
//!         ├── TaskDispatcher / MultiTaskDispatcher
//!         └── MessageBroker{Connection, Listener, Service}
//!               ├── input MessageQueue  ◄─ providers (Subscription)
//!               └── output MessageBus   ─► consumers
//! ```
//!
//! Blocking primitives all take a deadline ([`clock::Timeout`] /
//! [`clock::Timestamp`]); expiry is a distinguished return, never an error.
//! Cancellation is cooperative: threads observe termination at their next
//! suspension point. Logging goes through the `log` facade at debug /
//! warning / error severities plus an access channel (see [`logging`]).

pub mod broker;
pub mod clock;
pub mod dispatch;
pub mod error;
pub mod fabric;
pub mod http;
pub mod logging;
pub mod net;
pub mod requester;
pub mod subsystem;
pub mod sync;

// Re-export commonly used types
pub use broker::client::MessageBrokerConnection;
pub use broker::listener::MessageBrokerListener;
pub use broker::service::MessageBrokerService;
pub use broker::{BrokerFabric, LineReceiver, LineSender, ReceiverHandler, SenderHandler};
pub use clock::{Ticker, Timeout, Timestamp};
pub use dispatch::{MultiTaskDispatcher, Task, TaskDispatcher};
pub use error::{Error, ParseError, Result};
pub use fabric::{
    MessageBuffer, MessageBus, MessageConsumer, MessageFan, MessageProvider, MessageQueue,
    Subscription, SubscriptionSet,
};
pub use http::{Headers, HttpMessageParser, HttpMessageReader, HttpMessageWriter, StartLine};
pub use net::{AddrFamily, IoDevice, TcpAddrInfo, TcpSocket};
pub use requester::{InterThreadRequester, PendingRequest, RequestId, ThreadMessage};
pub use subsystem::{
    ManagedThread, OscillatorLoad, OscillatorThread, SchedulerLoad, SchedulerThread, Server,
    Subsystem, SubsystemUnit, WorkerScope, WorkerThread,
};
pub use sync::WaitCondition;
