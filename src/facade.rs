//! The asynchronous facade: a process-wide `Engine` singleton, two
//! background workers, and the flat public API (`open`/`close`/`read`/...)
//! that hides the registry and poll set behind free functions.

use crate::config::{EngineConfig, INVALID_ID, MAX_MESSAGE};
use crate::logging::default_logger;
use crate::pollset::{ModernPollSet, PollSet, Readiness};
use crate::queue::{BoundedQueue, Mode};
use crate::registry::Registry;
use crate::sync::{self, Connection, ReceiveOutcome, Role};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use slog::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// One item held in a connection's read queue: a payload for a client, or
/// a freshly-registered child's id for a server.
pub enum ReadItem {
    Message(Vec<u8>),
    ClientId(u64),
}

struct AsyncConnection {
    conn: Connection,
    read_queue: Arc<BoundedQueue<ReadItem>>,
    write_queue: Arc<BoundedQueue<Vec<u8>>>,
    children: Mutex<Vec<u64>>,
    parent_id: Option<u64>,
}

struct Engine {
    config: EngineConfig,
    logger: slog::Logger,
    registry: Registry<AsyncConnection>,
    poll: Mutex<Box<dyn PollSet + Send>>,
    running: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    fn new(config: EngineConfig, logger: slog::Logger) -> std::io::Result<Arc<Engine>> {
        #[cfg(feature = "legacy-poll")]
        let poll: Box<dyn PollSet + Send> = Box::new(crate::pollset::LegacyPollSet::new(64)?);
        #[cfg(not(feature = "legacy-poll"))]
        let poll: Box<dyn PollSet + Send> = Box::new(ModernPollSet::new(64)?);

        Ok(Arc::new(Engine {
            config,
            logger,
            registry: Registry::new(),
            poll: Mutex::new(poll),
            running: AtomicBool::new(false),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        }))
    }

    fn start_workers(self: &Arc<Engine>) {
        self.running.store(true, Ordering::SeqCst);

        let reader_engine = self.clone();
        *self.reader.lock() = Some(
            std::thread::Builder::new()
                .name("duplexnet-reader".into())
                .spawn(move || reader_loop(reader_engine))
                .expect("failed to spawn reader worker"),
        );

        let writer_engine = self.clone();
        *self.writer.lock() = Some(
            std::thread::Builder::new()
                .name("duplexnet-writer".into())
                .spawn(move || writer_loop(writer_engine))
                .expect("failed to spawn writer worker"),
        );

        info!(self.logger, "workers started");
    }

    fn stop_workers(&self) {
        self.running.store(false, Ordering::SeqCst);
        let join_timeout = Duration::from_millis(self.config.worker_join_timeout_ms);

        if let Some(handle) = self.reader.lock().take() {
            join_with_timeout(handle, join_timeout, &self.logger, "reader");
        }
        if let Some(handle) = self.writer.lock().take() {
            join_with_timeout(handle, join_timeout, &self.logger, "writer");
        }
        info!(self.logger, "workers stopped");
    }
}

fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, logger: &slog::Logger, name: &str) {
    // std::thread has no built-in timed join; the workers themselves poll
    // the running flag at most once per their own tick interval, so a
    // bounded sleep-then-join is the pragmatic equivalent here.
    let start = std::time::Instant::now();
    while !handle.is_finished() && start.elapsed() < timeout {
        std::thread::sleep(Duration::from_millis(10));
    }
    if handle.is_finished() {
        let _ = handle.join();
    } else {
        warn!(logger, "worker did not join within timeout"; "worker" => name);
    }
}

static ENGINE_SLOT: Lazy<Mutex<Option<Arc<Engine>>>> = Lazy::new(|| Mutex::new(None));

fn get_or_create_engine() -> Arc<Engine> {
    let mut slot = ENGINE_SLOT.lock();
    if let Some(engine) = slot.as_ref() {
        return engine.clone();
    }
    let engine = Engine::new(EngineConfig::default(), default_logger())
        .expect("failed to initialize polling backend");
    *slot = Some(engine.clone());
    engine
}

fn current_engine() -> Option<Arc<Engine>> {
    ENGINE_SLOT.lock().as_ref().cloned()
}

/// Installs a custom `EngineConfig`/root logger for the engine this
/// process is about to create. Only takes effect while no connection is
/// open: once the registry has gone from empty to non-empty, the engine
/// is live and this returns `false` without changing anything. Callers
/// that want different tunables after a full teardown (registry empty
/// again) may call this again before the next `open`.
pub fn configure(config: EngineConfig, logger: slog::Logger) -> bool {
    let mut slot = ENGINE_SLOT.lock();
    if slot.is_some() {
        return false;
    }
    let engine = Engine::new(config, logger).expect("failed to initialize polling backend");
    *slot = Some(engine);
    true
}

/// Opens a connection. `type_byte` combines transport and role bits (see
/// `sync::connection`). Returns `INVALID_ID` on any failure.
pub fn open(type_byte: u8, host: Option<&str>, port: u16) -> u64 {
    let engine = get_or_create_engine();

    let conn = match Connection::open(type_byte, host, port) {
        Ok(conn) => conn,
        Err(err) => {
            error!(engine.logger, "open failed"; "error" => %err);
            return INVALID_ID;
        }
    };

    let fd = conn.fd();
    let is_server = conn.is_server();

    if let Err(err) = engine.poll.lock().insert(fd, Readiness::READABLE) {
        error!(engine.logger, "failed to register descriptor"; "error" => %err);
        return INVALID_ID;
    }

    let async_conn = AsyncConnection {
        conn,
        read_queue: Arc::new(BoundedQueue::new(engine.config.queue_capacity)),
        write_queue: Arc::new(BoundedQueue::new(engine.config.queue_capacity)),
        children: Mutex::new(Vec::new()),
        parent_id: None,
    };

    let id = engine.registry.insert(async_conn);
    debug!(engine.logger, "connection opened"; "id" => id, "server" => is_server);

    if engine.registry.len() == 1 {
        engine.start_workers();
    }

    id
}

/// Closes a connection. Idempotent: closing an unknown id is a no-op.
/// Closing a server tears down every child it has accepted.
pub fn close(id: u64) {
    let Some(engine) = current_engine() else { return };
    close_inner(&engine, id);
}

fn close_inner(engine: &Arc<Engine>, id: u64) {
    let (should_remove_fd, fd, children, parent_id) = {
        let Some(mut guard) = engine.registry.acquire(id) else {
            return;
        };
        let should_remove_fd = guard.conn.close();
        let fd = guard.conn.fd();
        let children = std::mem::take(&mut *guard.children.lock());
        let parent_id = guard.parent_id;
        guard.read_queue.clear();
        guard.write_queue.clear();
        (should_remove_fd, fd, children, parent_id)
    };

    for child_id in children {
        close_inner(engine, child_id);
    }

    if should_remove_fd {
        let _ = engine.poll.lock().remove(fd);
    }

    engine.registry.remove(id);

    if let Some(parent) = parent_id {
        if let Some(parent_guard) = engine.registry.acquire(parent) {
            parent_guard.children.lock().retain(|&c| c != id);
        }
    }

    if engine.registry.is_empty() {
        engine.stop_workers();
        *ENGINE_SLOT.lock() = None;
    }
}

/// "host/port" for the connection's local (client) or bound (server)
/// address. `None` for an unknown id.
pub fn get_address(id: u64) -> Option<String> {
    let engine = current_engine()?;
    let guard = engine.registry.acquire(id)?;
    Some(sync::addr::format_slash(&guard.conn.local_addr))
}

/// Count of connections currently registered (servers and clients alike).
pub fn get_actives_number() -> usize {
    match current_engine() {
        Some(engine) => engine.registry.len(),
        None => 0,
    }
}

/// For a server, the number of clients it currently has; for a client,
/// always 1; 0 if `id` is unknown.
pub fn get_clients_number(id: u64) -> usize {
    let Some(engine) = current_engine() else {
        return 0;
    };
    let Some(guard) = engine.registry.acquire(id) else {
        return 0;
    };
    match guard.conn.role {
        Role::Client => 1,
        Role::Server => guard.children.lock().len(),
    }
}

/// Sets the message length bound, clamped to `[1, MAX_MESSAGE]`. Returns
/// the clamped value actually applied, or 0 if `id` is unknown.
pub fn set_message_length(id: u64, length: usize) -> usize {
    let Some(engine) = current_engine() else {
        return 0;
    };
    let Some(mut guard) = engine.registry.acquire(id) else {
        return 0;
    };
    let clamped = length.clamp(1, MAX_MESSAGE);
    guard.conn.message_length = clamped;
    clamped
}

/// Non-blocking read of the oldest queued message for a client
/// connection. Returns `None` when the queue is empty or `id` is a
/// server (or unknown) -- application threads must never block on the
/// facade, only the background workers do.
pub fn read(id: u64) -> Option<Vec<u8>> {
    let engine = current_engine()?;
    let (queue, is_client) = {
        let guard = engine.registry.acquire(id)?;
        (guard.read_queue.clone(), guard.conn.role == Role::Client)
    };
    if !is_client {
        warn!(engine.logger, "read called on a server connection"; "id" => id);
        return None;
    }
    match queue.dequeue(Mode::NoWait)? {
        ReadItem::Message(bytes) => Some(bytes),
        ReadItem::ClientId(_) => None,
    }
}

/// Enqueues `payload` for sending. Never blocks: a full write queue
/// drops its oldest message. Returns `false` only if `id` is unknown.
pub fn write(id: u64, payload: &[u8]) -> bool {
    let Some(engine) = current_engine() else {
        return false;
    };
    let Some(guard) = engine.registry.acquire(id) else {
        return false;
    };
    if !guard.write_queue.enqueue(payload.to_vec(), Mode::NoWait) {
        warn!(engine.logger, "write queue full, dropped oldest message"; "id" => id);
    }
    true
}

/// Non-blocking dequeue of one newly-accepted client id for a server
/// connection. Returns `INVALID_ID` when empty, unknown, or `id` is a
/// client.
pub fn get_client(id: u64) -> u64 {
    let Some(engine) = current_engine() else {
        return INVALID_ID;
    };
    let (queue, is_server) = {
        let Some(guard) = engine.registry.acquire(id) else {
            return INVALID_ID;
        };
        (guard.read_queue.clone(), guard.conn.role == Role::Server)
    };
    if !is_server {
        return INVALID_ID;
    }
    match queue.dequeue(Mode::NoWait) {
        Some(ReadItem::ClientId(client_id)) => client_id,
        _ => INVALID_ID,
    }
}

fn reader_loop(engine: Arc<Engine>) {
    while engine.running.load(Ordering::SeqCst) {
        let ready = {
            let mut poll = engine.poll.lock();
            poll.wait(engine.config.wait_timeout_ms)
        };

        let ready_count = match ready {
            Ok(n) => n,
            Err(err) => {
                error!(engine.logger, "poll wait failed"; "error" => %err);
                continue;
            }
        };

        if ready_count == 0 {
            continue;
        }

        for id in engine.registry.snapshot_keys() {
            service_readable(&engine, id);
        }
    }
}

fn service_readable(engine: &Arc<Engine>, id: u64) {
    // mio's default registration is edge-triggered: one readiness
    // notification can hide an arbitrary amount of kernel-buffered
    // backlog. Drain until the connection itself says `Pending`
    // (WouldBlock) rather than stopping after a single message, or a
    // burst of inbound traffic silently vanishes instead of queuing.
    let mut new_children: Vec<(Connection, u64)> = Vec::new();
    let mut peer_closed = false;
    {
        let mut guard = match engine.registry.acquire(id) {
            Some(g) => g,
            None => return,
        };

        let fd = guard.conn.fd();
        if !engine.poll.lock().is_ready(fd, Readiness::READABLE) {
            return;
        }

        loop {
            if guard.read_queue.is_full() {
                break;
            }

            match guard.conn.receive() {
                Ok(ReceiveOutcome::Message(bytes)) => {
                    guard.read_queue.enqueue(ReadItem::Message(bytes), Mode::Wait);
                }
                Ok(ReceiveOutcome::Accepted(child)) => {
                    new_children.push((child, id));
                }
                Ok(ReceiveOutcome::NewPeer(peer)) => {
                    let (socket, clients_count) = match &guard.conn.kind {
                        crate::sync::ConnectionKind::UdpServer {
                            socket,
                            clients_count,
                            ..
                        } => (socket.clone(), clients_count.clone()),
                        _ => break,
                    };
                    let pseudo = Connection::udp_pseudo_client(socket, peer, clients_count);
                    new_children.push((pseudo, id));
                }
                Ok(ReceiveOutcome::Pending) => break,
                Err(crate::error::Error::PeerClosed) => {
                    peer_closed = true;
                    break;
                }
                Err(err) => {
                    warn!(engine.logger, "receive failed"; "id" => id, "error" => %err);
                    break;
                }
            }
        }
    }

    if peer_closed {
        close_inner(engine, id);
        return;
    }

    for (child, parent_id) in new_children {
        register_child(engine, child, parent_id);
    }
}

fn register_child(engine: &Arc<Engine>, child: Connection, parent_id: u64) {
    let fd = child.fd();
    if let Err(err) = engine.poll.lock().insert(fd, Readiness::READABLE) {
        error!(engine.logger, "failed to register accepted child"; "error" => %err);
        return;
    }

    let async_conn = AsyncConnection {
        conn: child,
        read_queue: Arc::new(BoundedQueue::new(engine.config.queue_capacity)),
        write_queue: Arc::new(BoundedQueue::new(engine.config.queue_capacity)),
        children: Mutex::new(Vec::new()),
        parent_id: Some(parent_id),
    };
    let child_id = engine.registry.insert(async_conn);

    if let Some(parent_guard) = engine.registry.acquire(parent_id) {
        parent_guard.children.lock().push(child_id);
        parent_guard
            .read_queue
            .enqueue(ReadItem::ClientId(child_id), Mode::Wait);
    }
}

fn writer_loop(engine: Arc<Engine>) {
    while engine.running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(engine.config.writer_tick_ms));

        for id in engine.registry.snapshot_keys() {
            service_writable(&engine, id);
        }
    }
}

fn service_writable(engine: &Arc<Engine>, id: u64) {
    let mut dead = false;
    {
        let mut guard = match engine.registry.acquire(id) {
            Some(g) => g,
            None => return,
        };

        if let Some(payload) = guard.write_queue.dequeue(Mode::NoWait) {
            if let Err(err) = guard.conn.send(&payload) {
                match err {
                    crate::error::Error::InvalidArgument(_) => {
                        warn!(engine.logger, "dropped oversized message"; "id" => id, "error" => %err);
                    }
                    _ => {
                        warn!(engine.logger, "send failed, dropping connection"; "id" => id, "error" => %err);
                        dead = true;
                    }
                }
            }
        }
    }

    if dead {
        close_inner(engine, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dynamic_port() -> u16 {
        use rand::Rng;
        rand::thread_rng().gen_range(crate::config::PORT_MIN..60000)
    }

    #[test]
    fn configure_is_rejected_once_the_engine_is_live() {
        let id = open(
            crate::sync::connection::TYPE_TCP | crate::sync::connection::TYPE_SERVER,
            None,
            dynamic_port(),
        );
        assert_ne!(id, INVALID_ID);

        assert!(!configure(EngineConfig::default(), default_logger()));

        close(id);
    }
}

