//! Raw-TCP origin dialing for `tcp-any`/`socks5`/bastion service
//! descriptors, and the reserved virtual-DNS resolver (`spec.md` §4.D).

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use ferrule_core::error::{codes, CoreError, ErrorKind};
use ferrule_router::BastionTarget;
use tokio::net::TcpStream;
use tokio::time::timeout;

pub struct TcpDialer {
    connect_timeout: Duration,
}

impl TcpDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Dials a destination supplied per-request by the edge via the
    /// `jump-destination` preamble header. No retry: a failed dial is
    /// surfaced to the caller, whose own policy decides whether to retry.
    pub async fn dial_tcp_any(&self, jump_destination: &str) -> Result<TcpStream, CoreError> {
        self.dial(jump_destination).await
    }

    /// Dials the resolved host/port of a bastion URI (`ssh://`, `rdp://`,
    /// `smb://`, `tcp://`).
    pub async fn dial_bastion(&self, target: &BastionTarget) -> Result<TcpStream, CoreError> {
        self.dial(&format!("{}:{}", target.host, target.port)).await
    }

    async fn dial(&self, destination: &str) -> Result<TcpStream, CoreError> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(destination))
            .await
            .map_err(|_| {
                CoreError::new(codes::TIMEOUT_EXCEEDED, ErrorKind::Stream, format!("dialing `{destination}` timed out"))
            })?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::ConnectionRefused => CoreError::new(
                    codes::CONNECTION_REFUSED,
                    ErrorKind::Stream,
                    format!("`{destination}` refused the connection"),
                ),
                _ => CoreError::new(codes::DNS_ERROR, ErrorKind::Stream, format!("dialing `{destination}`: {e}")),
            })?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }
}

/// Answers reserved virtual-DNS queries from a static upstream list,
/// in-process, rather than forwarding to a real resolver (`spec.md` §4.D).
pub struct ReservedDnsResolver {
    records: HashMap<String, IpAddr>,
}

impl ReservedDnsResolver {
    pub fn new(records: HashMap<String, IpAddr>) -> Self {
        Self { records }
    }

    pub fn resolve(&self, name: &str) -> Option<IpAddr> {
        self.records.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_dns_resolves_known_and_rejects_unknown_names() {
        let mut records = HashMap::new();
        records.insert("ferrule.reserved-dns".to_string(), "10.0.0.1".parse().unwrap());
        let resolver = ReservedDnsResolver::new(records);
        assert_eq!(resolver.resolve("ferrule.reserved-dns"), Some("10.0.0.1".parse().unwrap()));
        assert_eq!(resolver.resolve("unknown.example.com"), None);
    }

    #[tokio::test]
    async fn dial_tcp_any_surfaces_connection_refused() {
        let dialer = TcpDialer::new(Duration::from_secs(1));
        // Nothing listens on this loopback port.
        let err = dialer.dial_tcp_any("127.0.0.1:1").await.unwrap_err();
        assert_eq!(err.code(), codes::CONNECTION_REFUSED);
    }
}
