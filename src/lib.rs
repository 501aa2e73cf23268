//! Portable synchronous TCP/UDP sockets behind one connection handle,
//! plus an asynchronous facade that drives all I/O from two background
//! workers so callers never block on the network.

pub mod config;
pub mod error;
pub mod facade;
pub mod logging;
pub mod pollset;
pub mod queue;
pub mod registry;
pub mod sync;

pub use config::{EngineConfig, INVALID_ID, MAX_MESSAGE, PORT_MIN, QUEUE_MAX_ITEMS};
pub use error::{Error, Result};
pub use sync::connection::{TYPE_CLIENT, TYPE_SERVER, TYPE_TCP, TYPE_UDP};

pub use facade::{
    close, configure, get_actives_number, get_address, get_client, get_clients_number, open, read,
    set_message_length, write,
};
