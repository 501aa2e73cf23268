//! The synchronous IP layer: connections that carry a socket, an address,
//! a role and a transport, and never block the calling thread beyond a
//! single non-blocking syscall.

pub mod addr;
pub mod connection;

pub use connection::{Connection, ConnectionKind, ReceiveOutcome, Role, Transport};
