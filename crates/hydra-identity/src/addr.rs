//! Multiaddrs and peer address bundles.
//!
//! Only the `/ip4/<addr>/tcp/<port>` and `/ip6/<addr>/tcp/<port>` forms are
//! understood, which is everything the fleet listens on or dials.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::PeerId;

/// A TCP multiaddr.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Multiaddr {
    socket: SocketAddr,
}

impl Multiaddr {
    /// Build from a socket address.
    pub fn tcp(socket: SocketAddr) -> Self {
        Self { socket }
    }

    /// The socket address to dial.
    pub fn to_socket_addr(&self) -> SocketAddr {
        self.socket
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.socket.port()
    }

    /// Whether the address is unroutable on the public internet.
    ///
    /// Loopback, unspecified, RFC 1918, link-local, CGNAT and IPv6
    /// unique-local addresses count as private.
    pub fn is_private(&self) -> bool {
        match self.socket.ip() {
            IpAddr::V4(ip) => is_private_v4(ip),
            IpAddr::V6(ip) => match ip.to_ipv4_mapped() {
                Some(v4) => is_private_v4(v4),
                None => is_private_v6(ip),
            },
        }
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || (a == 100 && (64..128).contains(&b))
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}

impl From<SocketAddr> for Multiaddr {
    fn from(socket: SocketAddr) -> Self {
        Self::tcp(socket)
    }
}

impl std::fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.socket.ip() {
            IpAddr::V4(ip) => write!(f, "/ip4/{}/tcp/{}", ip, self.socket.port()),
            IpAddr::V6(ip) => write!(f, "/ip6/{}/tcp/{}", ip, self.socket.port()),
        }
    }
}

impl std::fmt::Debug for Multiaddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl FromStr for Multiaddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidMultiaddr {
            addr: s.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = s.split('/').collect();
        let [empty, proto, host, transport, port] = parts[..] else {
            return Err(invalid("expected /ip4|ip6/<addr>/tcp/<port>"));
        };
        if !empty.is_empty() {
            return Err(invalid("must start with '/'"));
        }
        let ip = match proto {
            "ip4" => IpAddr::V4(host.parse().map_err(|_| invalid("bad ipv4 address"))?),
            "ip6" => IpAddr::V6(host.parse().map_err(|_| invalid("bad ipv6 address"))?),
            other => return Err(invalid(&format!("unsupported protocol {other}"))),
        };
        if transport != "tcp" {
            return Err(invalid("only tcp is supported"));
        }
        let port: u16 = port.parse().map_err(|_| invalid("bad port"))?;
        Ok(Self::tcp(SocketAddr::new(ip, port)))
    }
}

impl Serialize for Multiaddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Multiaddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A peer id with the addresses it can be reached at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrInfo {
    /// The peer.
    pub id: PeerId,
    /// Its dialable addresses.
    pub addrs: Vec<Multiaddr>,
}

impl AddrInfo {
    /// Create an address bundle.
    pub fn new(id: PeerId, addrs: Vec<Multiaddr>) -> Self {
        Self { id, addrs }
    }

    /// Whether every address is private. An empty list counts as private.
    pub fn is_private_only(&self) -> bool {
        self.addrs.iter().all(Multiaddr::is_private)
    }
}
