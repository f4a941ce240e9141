//! Peer addresses: the key for registry, health and probe correlation.
//!
//! Only literal `ip:port` endpoints are accepted. IPv4-mapped IPv6 addresses
//! collapse to plain IPv4 so a peer seen through a dual-stack socket compares
//! equal to the same peer written as `a.b.c.d:port`.

use std::fmt;
use std::net::{AddrParseError, SocketAddr};
use std::str::FromStr;

/// A canonicalized UDP endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddr(SocketAddr);

impl PeerAddr {
    pub fn new(addr: SocketAddr) -> Self {
        Self(canonicalize(addr))
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    /// The address to hand to a socket of the given family. An IPv6 socket
    /// reaches IPv4 peers through their mapped form.
    pub fn for_socket(&self, ipv6_socket: bool) -> SocketAddr {
        match self.0 {
            SocketAddr::V4(v4) if ipv6_socket => {
                SocketAddr::new(v4.ip().to_ipv6_mapped().into(), v4.port())
            }
            other => other,
        }
    }
}

fn canonicalize(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(v4.into(), v6.port()),
            None => addr,
        },
        SocketAddr::V4(_) => addr,
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr)
    }
}

impl From<PeerAddr> for SocketAddr {
    fn from(addr: PeerAddr) -> Self {
        addr.0
    }
}

impl FromStr for PeerAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>().map(Self::new)
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
