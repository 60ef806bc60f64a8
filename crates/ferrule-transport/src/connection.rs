//! Connection-level state (`spec.md` §3 `Connection`).

use std::time::Instant;

use ferrule_core::ids::ConnectionId;
use ferrule_core::net::EdgeAddress;
use ferrule_core::protocol::ProtocolChoice;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ConnectionState {
    Dialing,
    Registering,
    Live,
    Draining,
    Closed,
}

/// Opaque resumption credential issued by the edge at successful
/// registration (`spec.md` §3 `ReconnectToken`). May be absent for a
/// slot's first connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReconnectToken {
    pub bytes: Vec<u8>,
    pub expires_at: Instant,
}

impl ReconnectToken {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Why a [`crate::Transport`] transitioned to `Closed` (`spec.md` §4.C
/// graceful close / failure semantics).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CloseReason {
    /// Local shutdown initiated by the Connection Worker.
    LocalShutdown,
    /// GOAWAY / CONNECTION_CLOSE(no-error) from the edge, grace period
    /// elapsed or all streams finished.
    RemoteGoAway,
    HeartbeatTimeout,
    FlowControlViolation,
    Io(String),
    MalformedFrame(String),
    AuthRejected,
}

impl CloseReason {
    pub fn is_fatal_for_slot(&self) -> bool {
        matches!(self, CloseReason::AuthRejected)
    }
}

/// Connection bookkeeping visible to the Connection Worker and Diagnostic
/// Collector. Owned by the worker; the `Transport` itself only reports
/// state transitions through its async API, it does not hand out a shared
/// mutable `Connection`.
#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub address: EdgeAddress,
    pub protocol: ProtocolChoice,
    pub started_at: Instant,
    pub last_heartbeat_at: Instant,
    pub state: ConnectionState,
}
