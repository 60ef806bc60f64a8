//! Origin-side UDP/ICMP sockets for warp-routed datagram flows (`spec.md`
//! §2 row G, §4.G, §4.H "dispatch ... directly to G for datagrams"). One
//! [`DatagramSocket`] is dialed per [`FlowKey`] and owns the local half of
//! that flow for as long as it stays alive in the Flow Table.

use std::net::IpAddr;

use bytes::Bytes;
use ferrule_core::error::{codes, CoreError, ErrorKind};
use ferrule_flow::FlowKey;
use tokio::net::UdpSocket;

use crate::icmp::IcmpSocket;

/// A dialed origin socket for one UDP or ICMP-echo flow, uniform behind one
/// send/recv interface regardless of which kind it dials.
pub enum DatagramSocket {
    Udp(UdpSocket),
    Icmp(IcmpSocket),
}

impl DatagramSocket {
    /// Dials the origin side of `key`: a connected UDP socket for
    /// [`FlowKey::Udp`], a raw ICMP-echo socket for [`FlowKey::Icmp`].
    pub async fn dial(key: &FlowKey) -> Result<Self, CoreError> {
        match *key {
            FlowKey::Udp { dst_addr, dst_port, .. } => {
                let socket = UdpSocket::bind(wildcard(dst_addr)).await.map_err(|e| {
                    CoreError::new(codes::CONNECTION_REFUSED, ErrorKind::TransportTransient, format!("binding UDP origin socket: {e}"))
                })?;
                socket.connect((dst_addr, dst_port)).await.map_err(|e| {
                    CoreError::new(codes::CONNECTION_REFUSED, ErrorKind::TransportTransient, format!("connecting UDP origin socket to `{dst_addr}:{dst_port}`: {e}"))
                })?;
                Ok(DatagramSocket::Udp(socket))
            }
            FlowKey::Icmp { dst_addr, identifier, .. } => {
                Ok(DatagramSocket::Icmp(IcmpSocket::connect(dst_addr, identifier)?))
            }
        }
    }

    pub async fn send(&self, payload: &[u8]) -> std::io::Result<()> {
        match self {
            DatagramSocket::Udp(socket) => socket.send(payload).await.map(|_| ()),
            // The ICMP flow-key has no sequence component (`spec.md` §4.G);
            // every outbound echo on this flow reuses sequence 0.
            DatagramSocket::Icmp(socket) => socket.send_echo(0, payload).await,
        }
    }

    pub async fn recv(&self) -> std::io::Result<Bytes> {
        match self {
            DatagramSocket::Udp(socket) => {
                let mut buf = vec![0u8; 65_535];
                let n = socket.recv(&mut buf).await?;
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            DatagramSocket::Icmp(socket) => socket.recv_echo().await,
        }
    }
}

fn wildcard(dst: IpAddr) -> (IpAddr, u16) {
    if dst.is_ipv4() { ("0.0.0.0".parse().unwrap(), 0) } else { ("::".parse().unwrap(), 0) }
}
