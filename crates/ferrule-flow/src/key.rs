//! Flow keys (`spec.md` §3, §4.G): what correlates an outbound warp-routing
//! datagram with the flow it belongs to.

use std::net::IpAddr;

/// Identifies one UDP or ICMP-echo flow. UDP flows key on the full 5-tuple;
/// ICMP echo flows key on source/destination plus the echo identifier
/// (there is no port to disambiguate multiple pings between the same pair
/// of hosts).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FlowKey {
    Udp { src_addr: IpAddr, src_port: u16, dst_addr: IpAddr, dst_port: u16 },
    Icmp { src_addr: IpAddr, dst_addr: IpAddr, identifier: u16 },
}
