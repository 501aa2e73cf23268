use crate::config::{PORT_MIN, TCP_BACKLOG};
use crate::error::{Error, Result};
use crate::sync::addr::resolve;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Transport bits of the `open` type byte.
pub const TYPE_TCP: u8 = 0x10;
pub const TYPE_UDP: u8 = 0x20;
/// Role bits of the `open` type byte.
pub const TYPE_SERVER: u8 = 0x01;
pub const TYPE_CLIENT: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

/// Shared bookkeeping between a UDP server and the pseudo-clients that
/// borrow its descriptor. `server_closed` lets the last pseudo-client to
/// leave notice that the server already asked to close and finish the
/// descriptor removal itself, in case that happens out of order.
#[derive(Debug, Default)]
pub struct UdpShared {
    count: AtomicUsize,
    server_closed: AtomicBool,
}

/// Closed, four-way variant: role x transport dispatch is matched
/// exhaustively here instead of going through function pointers.
pub enum ConnectionKind {
    TcpServer {
        listener: TcpListener,
    },
    TcpClient {
        stream: TcpStream,
    },
    UdpServer {
        socket: Arc<UdpSocket>,
        known_peers: std::collections::HashSet<SocketAddr>,
        clients_count: Arc<UdpShared>,
    },
    UdpClient {
        socket: Arc<UdpSocket>,
        remote: SocketAddr,
        /// Set for a pseudo-client sharing a UDP server's descriptor; the
        /// server's refcount is decremented when this connection closes.
        owner_clients_count: Option<Arc<UdpShared>>,
    },
}

pub struct Connection {
    pub kind: ConnectionKind,
    pub role: Role,
    pub transport: Transport,
    pub local_addr: SocketAddr,
    pub message_length: usize,
}

/// What a receive attempt produced, role/transport-dependent.
pub enum ReceiveOutcome {
    /// A payload was read off a client connection (or a client-side read
    /// on a TCP server's accepted child).
    Message(Vec<u8>),
    /// A TCP server accepted a new remote; the caller should register it
    /// as a new connection.
    Accepted(Connection),
    /// A UDP server observed a source address it hadn't seen before; the
    /// datagram itself is left unconsumed for the new pseudo-client's own
    /// receive to pick up.
    NewPeer(SocketAddr),
    /// Nothing to do this call (would-block, or data belongs to a peer
    /// whose pseudo-client will consume it).
    Pending,
}

impl Connection {
    pub fn fd(&self) -> RawFd {
        match &self.kind {
            ConnectionKind::TcpServer { listener } => listener.as_raw_fd(),
            ConnectionKind::TcpClient { stream, .. } => stream.as_raw_fd(),
            ConnectionKind::UdpServer { socket, .. } => socket.as_raw_fd(),
            ConnectionKind::UdpClient { socket, .. } => socket.as_raw_fd(),
        }
    }

    pub fn is_server(&self) -> bool {
        matches!(self.role, Role::Server)
    }

    /// `Open`: parses the type byte, resolves the address, creates and
    /// configures the socket, and returns a ready-to-use `Connection`.
    pub fn open(type_byte: u8, host: Option<&str>, port: u16) -> Result<Connection> {
        let transport = match type_byte & 0xF0 {
            TYPE_TCP => Transport::Tcp,
            TYPE_UDP => Transport::Udp,
            _ => return Err(Error::InvalidArgument("unknown transport bits")),
        };
        let role = match type_byte & 0x0F {
            TYPE_SERVER => Role::Server,
            TYPE_CLIENT => Role::Client,
            _ => return Err(Error::InvalidArgument("unknown role bits")),
        };

        if port < PORT_MIN {
            return Err(Error::InvalidArgument("port below the dynamic/private range"));
        }
        if role == Role::Client && host.is_none() {
            return Err(Error::InvalidArgument("client connections require a host"));
        }

        let addr = resolve(host, port)?;

        match (transport, role) {
            (Transport::Tcp, Role::Server) => Self::open_tcp_server(addr),
            (Transport::Tcp, Role::Client) => Self::open_tcp_client(addr),
            (Transport::Udp, Role::Server) => Self::open_udp_server(addr),
            (Transport::Udp, Role::Client) => Self::open_udp_client(addr),
        }
    }

    fn open_tcp_server(addr: SocketAddr) -> Result<Connection> {
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(Error::SocketFailure)?;
        socket.set_reuse_address(true).map_err(Error::SocketFailure)?;
        if addr.is_ipv6() {
            socket.set_only_v6(false).map_err(Error::SocketFailure)?;
        }
        socket.bind(&addr.into()).map_err(Error::SocketFailure)?;
        socket.listen(TCP_BACKLOG).map_err(Error::SocketFailure)?;
        socket.set_nonblocking(true).map_err(Error::SocketFailure)?;

        let listener: TcpListener = socket.into();
        let local_addr = listener.local_addr().map_err(Error::SocketFailure)?;

        Ok(Connection {
            kind: ConnectionKind::TcpServer { listener },
            role: Role::Server,
            transport: Transport::Tcp,
            local_addr,
            message_length: crate::config::MAX_MESSAGE,
        })
    }

    fn open_tcp_client(addr: SocketAddr) -> Result<Connection> {
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(Error::SocketFailure)?;
        socket.set_reuse_address(true).map_err(Error::SocketFailure)?;
        socket.set_nonblocking(true).map_err(Error::SocketFailure)?;
        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(e) => return Err(Error::SocketFailure(e)),
        }

        let stream: TcpStream = socket.into();
        let local_addr = stream.local_addr().map_err(Error::SocketFailure)?;

        Ok(Connection {
            kind: ConnectionKind::TcpClient { stream },
            role: Role::Client,
            transport: Transport::Tcp,
            local_addr,
            message_length: crate::config::MAX_MESSAGE,
        })
    }

    fn open_udp_server(addr: SocketAddr) -> Result<Connection> {
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(Error::SocketFailure)?;
        socket.set_reuse_address(true).map_err(Error::SocketFailure)?;
        if addr.is_ipv6() {
            socket.set_only_v6(false).map_err(Error::SocketFailure)?;
            let _ = socket.set_multicast_hops_v6(255);
        } else {
            let _ = socket.set_multicast_ttl_v4(255);
            socket.set_broadcast(true).map_err(Error::SocketFailure)?;
        }
        socket.bind(&addr.into()).map_err(Error::SocketFailure)?;
        socket.set_nonblocking(true).map_err(Error::SocketFailure)?;

        let std_socket: UdpSocket = socket.into();
        let local_addr = std_socket.local_addr().map_err(Error::SocketFailure)?;

        Ok(Connection {
            kind: ConnectionKind::UdpServer {
                socket: Arc::new(std_socket),
                known_peers: std::collections::HashSet::new(),
                clients_count: Arc::new(UdpShared::default()),
            },
            role: Role::Server,
            transport: Transport::Udp,
            local_addr,
            message_length: crate::config::MAX_MESSAGE,
        })
    }

    fn open_udp_client(remote: SocketAddr) -> Result<Connection> {
        let domain = if remote.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(Error::SocketFailure)?;
        socket.set_reuse_address(true).map_err(Error::SocketFailure)?;

        let any = if remote.is_ipv6() {
            SocketAddr::new(std::net::IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), 0)
        } else {
            SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0)
        };
        socket.bind(&any.into()).map_err(Error::SocketFailure)?;
        socket.set_nonblocking(true).map_err(Error::SocketFailure)?;

        let std_socket: UdpSocket = socket.into();
        let local_addr = std_socket.local_addr().map_err(Error::SocketFailure)?;

        if remote.ip().is_multicast() {
            match remote.ip() {
                std::net::IpAddr::V4(v4) => {
                    std_socket
                        .join_multicast_v4(&v4, &std::net::Ipv4Addr::UNSPECIFIED)
                        .map_err(Error::SocketFailure)?;
                }
                std::net::IpAddr::V6(v6) => {
                    std_socket.join_multicast_v6(&v6, 0).map_err(Error::SocketFailure)?;
                }
            }
        }

        Ok(Connection {
            kind: ConnectionKind::UdpClient {
                socket: Arc::new(std_socket),
                remote,
                owner_clients_count: None,
            },
            role: Role::Client,
            transport: Transport::Udp,
            local_addr,
            message_length: crate::config::MAX_MESSAGE,
        })
    }

    /// Materialises a UDP server's pseudo-client: it shares the server's
    /// descriptor and carries only the peer's address.
    pub fn udp_pseudo_client(
        socket: Arc<UdpSocket>,
        remote: SocketAddr,
        clients_count: Arc<UdpShared>,
    ) -> Connection {
        clients_count.count.fetch_add(1, Ordering::SeqCst);
        let local_addr = remote;
        Connection {
            kind: ConnectionKind::UdpClient {
                socket,
                remote,
                owner_clients_count: Some(clients_count),
            },
            role: Role::Client,
            transport: Transport::Udp,
            local_addr,
            message_length: crate::config::MAX_MESSAGE,
        }
    }

    /// `Close`. Returns `true` if the underlying descriptor should be
    /// removed from the poll set (it wasn't shared with anything still
    /// alive). A UDP server with live pseudo-clients is a documented
    /// no-op: the descriptor stays registered until its clients close. If
    /// the server closes first, the last pseudo-client to leave finishes
    /// the removal instead.
    pub fn close(&self) -> bool {
        match &self.kind {
            ConnectionKind::UdpServer { clients_count, .. } => {
                clients_count.server_closed.store(true, Ordering::SeqCst);
                clients_count.count.load(Ordering::SeqCst) == 0
            }
            ConnectionKind::UdpClient {
                owner_clients_count: Some(shared),
                ..
            } => {
                let remaining = shared.count.fetch_sub(1, Ordering::SeqCst) - 1;
                remaining == 0 && shared.server_closed.load(Ordering::SeqCst)
            }
            _ => true,
        }
    }

    /// `Send`. Rejects payloads longer than this connection's message
    /// length bound without sending anything.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.message_length {
            return Err(Error::InvalidArgument("payload exceeds message length bound"));
        }

        match &mut self.kind {
            ConnectionKind::TcpClient { stream, .. } => {
                write_all_nonblocking(stream, payload)
            }
            ConnectionKind::UdpClient { socket, remote, .. } => socket
                .send_to(payload, *remote)
                .map(|_| ())
                .map_err(map_io),
            ConnectionKind::TcpServer { .. } | ConnectionKind::UdpServer { .. } => {
                Err(Error::WrongRole)
            }
        }
    }

    /// `Receive`. Role/transport-specific dispatch; never blocks.
    pub fn receive(&mut self) -> Result<ReceiveOutcome> {
        match &mut self.kind {
            ConnectionKind::TcpClient { stream, .. } => {
                let mut buf = vec![0u8; self.message_length];
                match std::io::Read::read(stream, &mut buf) {
                    Ok(0) => Err(Error::PeerClosed),
                    Ok(n) => {
                        buf.truncate(n);
                        Ok(ReceiveOutcome::Message(buf))
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        Ok(ReceiveOutcome::Pending)
                    }
                    Err(e) => Err(Error::TransientIo(e)),
                }
            }
            ConnectionKind::TcpServer { listener } => match listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true).map_err(Error::SocketFailure)?;
                    Ok(ReceiveOutcome::Accepted(Connection {
                        kind: ConnectionKind::TcpClient { stream },
                        role: Role::Client,
                        transport: Transport::Tcp,
                        local_addr: peer,
                        message_length: self.message_length,
                    }))
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(ReceiveOutcome::Pending),
                Err(e) => Err(Error::TransientIo(e)),
            },
            ConnectionKind::UdpClient { socket, remote, .. } => {
                let mut peek = [0u8; crate::config::MAX_MESSAGE];
                match socket.peek_from(&mut peek) {
                    Ok((_, src)) if src != *remote => Ok(ReceiveOutcome::Pending),
                    Ok((n, _)) => {
                        let mut buf = vec![0u8; n];
                        let (read, _) = socket.recv_from(&mut buf).map_err(map_io)?;
                        buf.truncate(read.min(self.message_length));
                        Ok(ReceiveOutcome::Message(buf))
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(ReceiveOutcome::Pending),
                    Err(e) => Err(Error::TransientIo(e)),
                }
            }
            ConnectionKind::UdpServer {
                socket,
                known_peers,
                ..
            } => {
                let mut peek = [0u8; crate::config::MAX_MESSAGE];
                match socket.peek_from(&mut peek) {
                    Ok((_, src)) => {
                        if known_peers.contains(&src) {
                            Ok(ReceiveOutcome::Pending)
                        } else {
                            known_peers.insert(src);
                            Ok(ReceiveOutcome::NewPeer(src))
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(ReceiveOutcome::Pending),
                    Err(e) => Err(Error::TransientIo(e)),
                }
            }
        }
    }
}

fn write_all_nonblocking(stream: &mut TcpStream, payload: &[u8]) -> Result<()> {
    use std::io::Write;
    match stream.write(payload) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(Error::TransientIo(e)),
    }
}

fn map_io(e: std::io::Error) -> Error {
    Error::TransientIo(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dynamic_port() -> u16 {
        use rand::Rng;
        rand::thread_rng().gen_range(PORT_MIN..60000)
    }

    #[test]
    fn rejects_port_below_dynamic_range() {
        let err = Connection::open(TYPE_TCP | TYPE_SERVER, None, 1024);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_client_without_host() {
        let err = Connection::open(TYPE_TCP | TYPE_CLIENT, None, dynamic_port());
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn rejects_unknown_type_bits() {
        let err = Connection::open(0xFF, Some("127.0.0.1"), dynamic_port());
        assert!(err.is_err());
    }

    #[test]
    fn tcp_server_opens_and_reports_address() {
        let conn = Connection::open(TYPE_TCP | TYPE_SERVER, None, dynamic_port())
            .expect("tcp server should open");
        assert!(conn.is_server());
        assert_eq!(conn.transport, Transport::Tcp);
    }
}
