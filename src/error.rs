use std::io;
use std::net;

/// Public error surface. Transient would-block conditions are never represented
/// here -- see `Wait` -- so callers on the hot path never pay for formatting a
/// message they're going to retry past anyway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("address resolution failed: {0}")]
    ResolveFailure(#[from] net::AddrParseError),

    #[error("socket setup failed: {0}")]
    SocketFailure(#[source] io::Error),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("i/o error: {0}")]
    TransientIo(#[source] io::Error),

    #[error("write queue full, oldest message dropped")]
    QueueFull,

    #[error("no connection with that id")]
    NotFound,

    #[error("operation not valid for this connection's role")]
    WrongRole,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Internal would-block sentinel. Kept separate from `Error` so that the
/// receive/send retry loops in the synchronous layer never allocate.
pub(crate) struct Wait;

pub(crate) type IoResult<T> = std::result::Result<T, IoOutcome>;

pub(crate) enum IoOutcome {
    Wait,
    Eof,
    Err(io::Error),
}

impl From<io::Error> for IoOutcome {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => IoOutcome::Wait,
            _ => IoOutcome::Err(err),
        }
    }
}
