//! Identifiers threaded through every subsystem: tunnel identity, the
//! process-scoped connector id, and the small integer ids for connections
//! and streams (`spec.md` §3).

use std::fmt;

use uuid::Uuid;

/// 128-bit tunnel id from the credentials file (`spec.md` §6). Opaque:
/// compared and displayed, never parsed for meaning.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct TunnelId(pub Uuid);

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Process-scoped id distinguishing one connector instance among many
/// sharing a tunnel identity (glossary: "Connector ID").
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ConnectorId(pub Uuid);

impl ConnectorId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Index of a [`PoolSlot`](crate::pool::PoolSlot)-equivalent worker, `[0, N)`.
pub type SlotIndex = usize;

/// Monotonically increasing per-connection id, assigned by the Supervisor
/// each time a slot reconnects.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// Stream id as carried on the wire. Odd values are client-initiated, even
/// values are edge-initiated (`spec.md` §4.C framed-mux semantics); QUIC
/// stream ids are mapped onto this space 1:1 by the transport impl.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl StreamId {
    pub fn is_client_initiated(self) -> bool {
        self.0 % 2 == 1
    }

    pub fn is_edge_initiated(self) -> bool {
        self.0 % 2 == 0
    }
}

/// Flow id handed out by the ICMP/UDP flow table (`spec.md` §4.G, §8
/// invariant 6: no two live flows share a flow-id).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct FlowId(pub u64);
