//! Raw ICMPv4 echo dialing for warp-routed ICMP flows (`spec.md` §4.G).
//! Opening the underlying raw socket needs `CAP_NET_RAW` (or root) on
//! Linux, the same privilege any `ping`-like tool needs.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use ferrule_core::error::{codes, CoreError, ErrorKind};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_HEADER_LEN: usize = 8;

pub struct IcmpSocket {
    inner: UdpSocket,
    identifier: u16,
}

impl IcmpSocket {
    /// Opens a raw ICMPv4 socket connected to `dst`. `identifier` is this
    /// flow's echo identifier, used to filter replies on a socket that
    /// otherwise sees every ICMP packet destined to this host.
    pub fn connect(dst: IpAddr, identifier: u16) -> Result<Self, CoreError> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .map_err(raw_socket_error)?;
        socket.set_nonblocking(true).map_err(raw_socket_error)?;
        socket
            .connect(&SockAddr::from(SocketAddr::new(dst, 0)))
            .map_err(raw_socket_error)?;
        let std_socket: std::net::UdpSocket = socket.into();
        let inner = UdpSocket::from_std(std_socket).map_err(raw_socket_error)?;
        Ok(Self { inner, identifier })
    }

    pub async fn send_echo(&self, sequence: u16, payload: &[u8]) -> std::io::Result<()> {
        let packet = build_echo_request(self.identifier, sequence, payload);
        self.inner.send(&packet).await.map(|_| ())
    }

    /// Reads inbound packets until one is an echo reply for this socket's
    /// identifier, then returns its payload. The kernel hands a raw socket
    /// the full IPv4 header in front of the ICMP message, which is stripped
    /// here along with the ICMP header itself.
    pub async fn recv_echo(&self) -> std::io::Result<Bytes> {
        let mut raw = vec![0u8; 65_535];
        loop {
            let n = self.inner.recv(&mut raw).await?;
            if let Some(payload) = parse_echo_reply(&raw[..n], self.identifier) {
                return Ok(Bytes::copy_from_slice(payload));
            }
        }
    }
}

fn raw_socket_error(e: std::io::Error) -> CoreError {
    CoreError::new(codes::CONNECTION_REFUSED, ErrorKind::TransportTransient, format!("opening raw ICMP socket: {e}"))
}

fn build_echo_request(identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(ICMP_HEADER_LEN + payload.len());
    packet.push(ICMP_ECHO_REQUEST);
    packet.push(0); // code
    packet.extend_from_slice(&[0, 0]); // checksum, filled in below
    packet.extend_from_slice(&identifier.to_be_bytes());
    packet.extend_from_slice(&sequence.to_be_bytes());
    packet.extend_from_slice(payload);
    let checksum = icmp_checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    packet
}

fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum = 0u32;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = *chunks.remainder() {
        sum += (last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

fn ipv4_header_len(packet: &[u8]) -> usize {
    (packet.first().copied().unwrap_or(0x45) & 0x0F) as usize * 4
}

fn parse_echo_reply(raw: &[u8], expected_identifier: u16) -> Option<&[u8]> {
    let icmp = raw.get(ipv4_header_len(raw)..)?;
    if icmp.len() < ICMP_HEADER_LEN || icmp[0] != ICMP_ECHO_REPLY {
        return None;
    }
    let identifier = u16::from_be_bytes([icmp[4], icmp[5]]);
    if identifier != expected_identifier {
        return None;
    }
    Some(&icmp[ICMP_HEADER_LEN..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_a_zeroed_header_is_its_ones_complement() {
        let packet = [0u8; 8];
        // All-zero input sums to 0; the checksum of 0 is the all-ones value.
        assert_eq!(icmp_checksum(&packet), 0xFFFF);
    }

    #[test]
    fn echo_request_carries_identifier_sequence_and_payload() {
        let packet = build_echo_request(0x1234, 7, b"ping");
        assert_eq!(packet[0], ICMP_ECHO_REQUEST);
        assert_eq!(u16::from_be_bytes([packet[4], packet[5]]), 0x1234);
        assert_eq!(u16::from_be_bytes([packet[6], packet[7]]), 7);
        assert_eq!(&packet[8..], b"ping");
    }

    #[test]
    fn parse_echo_reply_rejects_a_mismatched_identifier() {
        let packet = build_echo_request(0x1234, 1, b"x");
        let mut reply = packet;
        reply[0] = ICMP_ECHO_REPLY;
        assert!(parse_echo_reply(&reply, 0x9999).is_none());
    }

    #[test]
    fn parse_echo_reply_extracts_the_payload_past_both_headers() {
        let mut reply = build_echo_request(0x1234, 1, b"pong");
        reply[0] = ICMP_ECHO_REPLY;
        assert_eq!(parse_echo_reply(&reply, 0x1234), Some(b"pong".as_slice()));
    }
}
