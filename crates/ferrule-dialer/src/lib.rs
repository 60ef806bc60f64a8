//! Origin Dialer (`spec.md` §4.D): given a `ServiceDescriptor` and
//! per-request overrides, produces a byte stream or HTTP response toward
//! the local service. Never retries; the caller's policy decides that.

pub mod datagram;
pub mod http;
pub mod icmp;
pub mod pool;
pub mod tcp;
pub mod tls;

pub use datagram::DatagramSocket;
pub use http::{HttpDialer, RequestBody};
pub use tcp::{ReservedDnsResolver, TcpDialer};

use std::net::IpAddr;

use ferrule_core::error::{codes, CoreError, ErrorKind};
use ferrule_flow::FlowKey;
use ferrule_router::ServiceDescriptor;
use tokio::net::TcpStream;

/// Aggregates the per-service-kind dialers behind one entry point. Built
/// once per process and shared across Connection Workers.
pub struct OriginDialer {
    pub http: HttpDialer,
    pub tcp: TcpDialer,
    pub reserved_dns: ReservedDnsResolver,
}

impl OriginDialer {
    pub fn new(http: HttpDialer, tcp: TcpDialer, reserved_dns: ReservedDnsResolver) -> Self {
        Self { http, tcp, reserved_dns }
    }

    /// Dials the raw-TCP family of service descriptors (`tcp-any`, bastion,
    /// and `socks5`, which is treated as a tcp-any connect to the
    /// descriptor's configured address — `spec.md` §4.D does not define
    /// SOCKS5-specific handshake behavior beyond the descriptor tag).
    pub async fn dial_stream(&self, descriptor: &ServiceDescriptor, jump_destination: Option<&str>) -> Result<TcpStream, CoreError> {
        match descriptor {
            ServiceDescriptor::TcpAny | ServiceDescriptor::Socks5 => {
                let destination = jump_destination.ok_or_else(|| {
                    CoreError::new(codes::DNS_ERROR, ErrorKind::Stream, "tcp-any service requires a jump-destination")
                })?;
                self.tcp.dial_tcp_any(destination).await
            }
            ServiceDescriptor::Bastion(target) => self.tcp.dial_bastion(target).await,
            other => Err(unsupported(other)),
        }
    }

    pub fn resolve_reserved_dns(&self, name: &str) -> Option<IpAddr> {
        self.reserved_dns.resolve(name)
    }

    /// Dials the origin side of one warp-routed UDP/ICMP flow (`spec.md`
    /// §4.G): a connected UDP socket, or a raw ICMP-echo socket filtered to
    /// `key`'s identifier.
    pub async fn dial_datagram(&self, key: &FlowKey) -> Result<DatagramSocket, CoreError> {
        DatagramSocket::dial(key).await
    }
}

fn unsupported(descriptor: &ServiceDescriptor) -> CoreError {
    CoreError::new(
        codes::DNS_ERROR,
        ErrorKind::Configuration,
        format!("{descriptor:?} is not a raw-stream service descriptor"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn dial_stream_requires_jump_destination_for_tcp_any() {
        let dialer = OriginDialer::new(
            HttpDialer::new(8, StdDuration::from_secs(90), StdDuration::from_secs(5)),
            TcpDialer::new(StdDuration::from_secs(5)),
            ReservedDnsResolver::new(Default::default()),
        );
        let err = dialer.dial_stream(&ServiceDescriptor::TcpAny, None).await.unwrap_err();
        assert_eq!(err.code(), codes::DNS_ERROR);
    }

    #[tokio::test]
    async fn dial_stream_rejects_non_stream_descriptors() {
        let dialer = OriginDialer::new(
            HttpDialer::new(8, StdDuration::from_secs(90), StdDuration::from_secs(5)),
            TcpDialer::new(StdDuration::from_secs(5)),
            ReservedDnsResolver::new(Default::default()),
        );
        let err = dialer.dial_stream(&ServiceDescriptor::HelloWorld, None).await.unwrap_err();
        assert_eq!(err.code(), codes::DNS_ERROR);
    }
}
