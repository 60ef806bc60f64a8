//! Network-address types shared between the Edge Address Book, the
//! transports, and the origin dialer.

use std::fmt;
use std::net::SocketAddr;

/// IP-version preference for edge resolution and socket binding
/// (`spec.md` §4.A, §6 `edge-ip-version`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum IpFamily {
    V4Only,
    V6Only,
    Auto,
}

impl IpFamily {
    /// Whether `addr` is acceptable under this preference.
    pub fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            IpFamily::V4Only => addr.is_ipv4(),
            IpFamily::V6Only => addr.is_ipv6(),
            IpFamily::Auto => true,
        }
    }
}

/// A resolved edge endpoint (`spec.md` §3 `EdgeAddress`). Cheap to clone;
/// identity for pooling purposes is `(host, port)`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct EdgeAddress {
    pub host: String,
    pub port: u16,
    pub socket_addr: SocketAddr,
}

impl EdgeAddress {
    pub fn new(host: impl Into<String>, socket_addr: SocketAddr) -> Self {
        Self {
            host: host.into(),
            port: socket_addr.port(),
            socket_addr,
        }
    }

    pub fn family(&self) -> IpFamily {
        if self.socket_addr.is_ipv4() {
            IpFamily::V4Only
        } else {
            IpFamily::V6Only
        }
    }
}

impl fmt::Display for EdgeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
