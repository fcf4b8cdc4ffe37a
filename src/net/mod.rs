//! TCP endpoint and socket layer.
//!
//! [`TcpAddrInfo`] resolves a host specification to a non-empty endpoint
//! list; [`TcpSocket`] is an explicit state machine over a non-blocking
//! stream socket with deadline-bounded I/O. [`IoDevice`] is the seam the
//! HTTP stream reader/writer plug into.

mod addr;
mod socket;

pub use addr::{AddrFamily, Endpoint, TcpAddrInfo};
pub use socket::{IoDevice, TcpSocket};
