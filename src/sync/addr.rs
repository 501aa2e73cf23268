use crate::error::{Error, Result};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

/// Resolves `host:port`, preferring an IPv6 result and falling back to
/// IPv4 when no IPv6 address is available. `host = None` resolves to the
/// unspecified address (servers binding to "any").
pub fn resolve(host: Option<&str>, port: u16) -> Result<SocketAddr> {
    let host = match host {
        Some(h) => h,
        None => return Ok(SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), port)),
    };

    if let Ok(addr) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(addr, port));
    }

    let candidates: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::SocketFailure(e))?
        .collect();

    candidates
        .iter()
        .find(|a| a.is_ipv6())
        .or_else(|| candidates.first())
        .copied()
        .ok_or(Error::InvalidArgument("host did not resolve to any address"))
}

/// Formats an address the way `get_address` reports it: numeric host,
/// `/`, numeric port.
pub fn format_slash(addr: &SocketAddr) -> String {
    format!("{}/{}", addr.ip(), addr.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_numeric_ipv4() {
        let addr = resolve(Some("127.0.0.1"), 50000).unwrap();
        assert_eq!(addr.port(), 50000);
        assert!(addr.is_ipv4());
    }

    #[test]
    fn resolves_numeric_ipv6() {
        let addr = resolve(Some("::1"), 50000).unwrap();
        assert!(addr.is_ipv6());
    }

    #[test]
    fn none_host_resolves_to_unspecified() {
        let addr = resolve(None, 50000).unwrap();
        assert!(addr.ip().is_unspecified());
    }

    #[test]
    fn format_matches_slash_convention() {
        let addr = resolve(Some("127.0.0.1"), 50000).unwrap();
        assert_eq!(format_slash(&addr), "127.0.0.1/50000");
    }
}
