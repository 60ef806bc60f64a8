//! Diagnostic Collector (`spec.md` §4.K): assembles an on-demand snapshot
//! from data the Supervisor and transports already hold. Never includes
//! credentials or secrets — the allowed-flags list is an explicit
//! allow-list rather than a reflective dump (`spec.md` §9 "Runtime
//! reflection on CLI flags → explicit allow-list").

use std::net::IpAddr;
use std::time::Duration;

use ferrule_core::net::EdgeAddress;
use ferrule_core::protocol::ProtocolChoice;

/// One pooled connection's state at snapshot time.
#[derive(Clone, Debug)]
pub struct ConnectionSnapshot {
    pub index: usize,
    pub edge_address: EdgeAddress,
    pub protocol: ProtocolChoice,
    pub state: String,
    pub uptime: Duration,
}

#[derive(Clone, Debug)]
pub struct DiagnosticSnapshot {
    pub connector_id: String,
    pub tunnel_id: String,
    pub connections: Vec<ConnectionSnapshot>,
    pub flags: Vec<(&'static str, String)>,
    pub icmp_source_addresses: Vec<IpAddr>,
    pub system_info: String,
}

/// The fixed set of CLI flags the Diagnostic Collector is allowed to
/// disclose. Extend this list deliberately; never iterate the full flag
/// set reflectively.
pub const DISCLOSABLE_FLAGS: &[&str] = &[
    "edge-ip-version",
    "protocol",
    "post-quantum",
    "ha-connections",
    "heartbeat-interval",
    "heartbeat-count",
    "rpc-timeout",
    "grace-period",
    "retries",
    "max-edge-addr-retries",
    "quic-disable-pmtu-discovery",
    "max-active-flows",
];

pub struct DiagnosticCollector {
    connector_id: String,
    tunnel_id: String,
    system_info: String,
}

impl DiagnosticCollector {
    pub fn new(connector_id: impl Into<String>, tunnel_id: impl Into<String>, system_info: impl Into<String>) -> Self {
        Self { connector_id: connector_id.into(), tunnel_id: tunnel_id.into(), system_info: system_info.into() }
    }

    /// Builds a snapshot from caller-supplied state. `flags` must already
    /// be filtered to [`DISCLOSABLE_FLAGS`]; callers that assemble it from
    /// a config struct should do so field-by-field, not via reflection.
    pub fn snapshot(
        &self,
        connections: Vec<ConnectionSnapshot>,
        flags: Vec<(&'static str, String)>,
        icmp_source_addresses: Vec<IpAddr>,
    ) -> DiagnosticSnapshot {
        debug_assert!(
            flags.iter().all(|(name, _)| DISCLOSABLE_FLAGS.contains(name)),
            "diagnostic flags must come from the explicit allow-list"
        );
        DiagnosticSnapshot {
            connector_id: self.connector_id.clone(),
            tunnel_id: self.tunnel_id.clone(),
            connections,
            flags,
            icmp_source_addresses,
            system_info: self.system_info.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_carries_through_supplied_state() {
        let collector = DiagnosticCollector::new("connector-1", "tunnel-1", "linux/amd64");
        let snapshot = collector.snapshot(
            vec![ConnectionSnapshot {
                index: 0,
                edge_address: EdgeAddress::new("edge.example.internal", "127.0.0.1:7844".parse().unwrap()),
                protocol: ProtocolChoice::Quic,
                state: "live".to_string(),
                uptime: Duration::from_secs(120),
            }],
            vec![("ha-connections", "4".to_string())],
            vec!["10.0.0.1".parse().unwrap()],
        );
        assert_eq!(snapshot.connector_id, "connector-1");
        assert_eq!(snapshot.connections.len(), 1);
        assert_eq!(snapshot.flags, vec![("ha-connections", "4".to_string())]);
    }
}
