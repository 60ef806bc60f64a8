//! Correlates QUIC datagrams with ICMP/UDP flows (`spec.md` §4.G, §4.H
//! `live`: "dispatch to G for datagrams"). The datagram *payload* format
//! below this envelope is between the edge and the origin and is opaque
//! here; only the fixed-size envelope identifying the flow is our own.
//!
//! Envelope layout (big-endian): `protocol: u8` (0 = UDP, 1 = ICMP echo),
//! `src_addr: [u8; 4]`, `src_port: u16`, `dst_addr: [u8; 4]`, `dst_port_or_id: u16`.
//! IPv6 and non-v4 ICMP are out of scope for this minimal envelope.

use std::net::{IpAddr, Ipv4Addr};

use bytes::{Bytes, BytesMut};
use ferrule_flow::FlowKey;

const ENVELOPE_LEN: usize = 1 + 4 + 2 + 4 + 2;

pub fn decode_flow_key(datagram: &Bytes) -> Option<FlowKey> {
    if datagram.len() < ENVELOPE_LEN {
        return None;
    }
    let b = &datagram[..ENVELOPE_LEN];
    let src_addr = Ipv4Addr::new(b[1], b[2], b[3], b[4]).into();
    let dst_addr = Ipv4Addr::new(b[7], b[8], b[9], b[10]).into();
    match b[0] {
        0 => {
            let src_port = u16::from_be_bytes([b[5], b[6]]);
            let dst_port = u16::from_be_bytes([b[11], b[12]]);
            Some(FlowKey::Udp { src_addr, src_port, dst_addr, dst_port })
        }
        1 => {
            let identifier = u16::from_be_bytes([b[11], b[12]]);
            Some(FlowKey::Icmp { src_addr, dst_addr, identifier })
        }
        _ => None,
    }
}

/// Strips the fixed-size envelope off an inbound datagram, returning the
/// application payload that follows it. `None` if the datagram is shorter
/// than the envelope.
pub fn strip_envelope(datagram: &Bytes) -> Option<Bytes> {
    if datagram.len() < ENVELOPE_LEN {
        return None;
    }
    Some(datagram.slice(ENVELOPE_LEN..))
}

/// Builds the outbound envelope for a reply datagram travelling back to the
/// edge, mirroring [`decode_flow_key`]'s layout. Only IPv4 addresses fit in
/// this envelope; an IPv6 `key` has no encoding and returns `None`.
pub fn encode_flow_key(key: &FlowKey, payload: &[u8]) -> Option<Bytes> {
    let mut buf = BytesMut::with_capacity(ENVELOPE_LEN + payload.len());
    match *key {
        FlowKey::Udp { src_addr, src_port, dst_addr, dst_port } => {
            buf.extend_from_slice(&[0]);
            buf.extend_from_slice(&ipv4_octets(src_addr)?);
            buf.extend_from_slice(&src_port.to_be_bytes());
            buf.extend_from_slice(&ipv4_octets(dst_addr)?);
            buf.extend_from_slice(&dst_port.to_be_bytes());
        }
        FlowKey::Icmp { src_addr, dst_addr, identifier } => {
            buf.extend_from_slice(&[1]);
            buf.extend_from_slice(&ipv4_octets(src_addr)?);
            buf.extend_from_slice(&[0, 0]);
            buf.extend_from_slice(&ipv4_octets(dst_addr)?);
            buf.extend_from_slice(&identifier.to_be_bytes());
        }
    }
    buf.extend_from_slice(payload);
    Some(buf.freeze())
}

fn ipv4_octets(addr: IpAddr) -> Option<[u8; 4]> {
    match addr {
        IpAddr::V4(v4) => Some(v4.octets()),
        IpAddr::V6(_) => None,
    }
}
