//! Address resolution.

use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::{Error, Result};

/// Address family selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrFamily {
    /// IPv4.
    IpV4,
    /// IPv6.
    IpV6,
}

impl AddrFamily {
    fn matches(self, addr: &SocketAddr) -> bool {
        match self {
            AddrFamily::IpV4 => addr.is_ipv4(),
            AddrFamily::IpV6 => addr.is_ipv6(),
        }
    }
}

/// One resolved `{host, port}` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Numeric host literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

/// Resolved TCP address information.
///
/// Construction resolves eagerly and fails rather than produce an empty
/// endpoint list. Resolution may yield several endpoints; binding iterates
/// them until one succeeds, connecting uses [`TcpAddrInfo::first_endpoint`].
#[derive(Debug, Clone)]
pub struct TcpAddrInfo {
    family: AddrFamily,
    spec: String,
    endpoints: Vec<SocketAddr>,
}

impl TcpAddrInfo {
    /// Resolve a literal host (name or numeric) and port.
    ///
    /// # Errors
    ///
    /// [`Error::Resolve`] if lookup fails or yields no endpoint of the
    /// requested family. Ports are numeric only — service-name lookup is not
    /// supported.
    pub fn new(family: AddrFamily, host: &str, port: u16) -> Result<Self> {
        let spec = format!("{host}:{port}");
        let addrs = (host, port).to_socket_addrs().map_err(|e| Error::Resolve {
            spec: spec.clone(),
            source: e,
        })?;
        let endpoints: Vec<SocketAddr> = addrs.filter(|a| family.matches(a)).collect();
        if endpoints.is_empty() {
            return Err(Error::Resolve {
                spec,
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no endpoint of the requested address family",
                ),
            });
        }
        Ok(TcpAddrInfo {
            family,
            spec,
            endpoints,
        })
    }

    /// The wildcard (any-interface) address for the family.
    pub fn wildcard(family: AddrFamily, port: u16) -> Result<Self> {
        let host = match family {
            AddrFamily::IpV4 => "0.0.0.0",
            AddrFamily::IpV6 => "::",
        };
        TcpAddrInfo::new(family, host, port)
    }

    /// The loopback address for the family.
    pub fn loopback(family: AddrFamily, port: u16) -> Result<Self> {
        let host = match family {
            AddrFamily::IpV4 => "127.0.0.1",
            AddrFamily::IpV6 => "::1",
        };
        TcpAddrInfo::new(family, host, port)
    }

    /// Requested address family.
    #[must_use]
    pub fn family(&self) -> AddrFamily {
        self.family
    }

    /// The `host:port` specification this was resolved from.
    #[must_use]
    pub fn spec(&self) -> &str {
        &self.spec
    }

    /// All resolved socket addresses (never empty).
    #[must_use]
    pub fn endpoints(&self) -> &[SocketAddr] {
        &self.endpoints
    }

    /// The preferred endpoint as a `{host, port}` pair.
    #[must_use]
    pub fn first_endpoint(&self) -> Endpoint {
        let first = self.endpoints[0];
        Endpoint {
            host: first.ip().to_string(),
            port: first.port(),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_v4_resolves() {
        let info = TcpAddrInfo::loopback(AddrFamily::IpV4, 8080).expect("resolve");
        assert!(!info.endpoints().is_empty());
        let ep = info.first_endpoint();
        assert_eq!(ep.host, "127.0.0.1");
        assert_eq!(ep.port, 8080);
    }

    #[test]
    fn test_wildcard_v4_resolves() {
        let info = TcpAddrInfo::wildcard(AddrFamily::IpV4, 0).expect("resolve");
        assert_eq!(info.first_endpoint().host, "0.0.0.0");
    }

    #[test]
    fn test_family_filter_applies() {
        let info = TcpAddrInfo::new(AddrFamily::IpV4, "127.0.0.1", 1234).expect("resolve");
        assert!(info.endpoints().iter().all(SocketAddr::is_ipv4));
    }

    #[test]
    fn test_unresolvable_host_errors() {
        let err = TcpAddrInfo::new(AddrFamily::IpV4, "host.invalid.servkit.test", 80);
        assert!(err.is_err());
    }
}
