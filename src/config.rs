//! Programmatic engine tunables. Deliberately has no file or environment
//! loader -- every value here is a compiled-in default or an explicit
//! constructor argument, never hidden I/O performed at startup.

/// Maximum payload size of a single message, in bytes.
pub const MAX_MESSAGE: usize = 512;

/// Maximum number of items held in any one read or write queue.
pub const QUEUE_MAX_ITEMS: usize = 10;

/// Sentinel returned in place of a connection id when an operation fails.
pub const INVALID_ID: u64 = u64::MAX;

/// Default timeout, in milliseconds, for a single `WaitEvent` poll.
pub const WAIT_TIME_MS: u64 = 5_000;

/// Lowest port number accepted by `open` (the Dynamic/Private range).
pub const PORT_MIN: u16 = 49_152;

/// TCP listen backlog used by server sockets.
pub const TCP_BACKLOG: i32 = 20;

/// Tunables for one `Engine` instance. `Default` reproduces the spec's
/// fixed constants; construct a different value and pass it to
/// `facade::configure` before the first `open` to change them.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Capacity of each connection's read and write queue.
    pub queue_capacity: usize,
    /// Timeout the reader worker blocks for in a single poll iteration.
    pub wait_timeout_ms: u64,
    /// How often the writer worker wakes up to drain write queues.
    pub writer_tick_ms: u64,
    /// Bound on how long `Close` waits for worker threads to join.
    pub worker_join_timeout_ms: u64,
    /// Default per-connection message length bound.
    pub default_message_length: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            queue_capacity: QUEUE_MAX_ITEMS,
            wait_timeout_ms: WAIT_TIME_MS,
            writer_tick_ms: 1_000,
            worker_join_timeout_ms: 5_000,
            default_message_length: MAX_MESSAGE,
        }
    }
}
