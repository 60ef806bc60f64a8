//! The [`Transport`] trait (`spec.md` §4.C) — the object-safe abstraction
//! over framed-mux and QUIC that the Connection Worker drives. One
//! `Transport` instance wraps one already-established encrypted
//! connection; it does not know how that connection was dialed.

use async_trait::async_trait;
use bytes::Bytes;
use ferrule_core::context::ExecutionContext;
use tokio::sync::mpsc;

use crate::connection::{CloseReason, ConnectionState};
use crate::error::TransportError;
use crate::stream::BoxStream;

/// What the Connection Worker sends at registration (`spec.md` §4.C, §4.L).
#[derive(Clone, Debug)]
pub struct RegisterRequest {
    pub account_tag: String,
    pub features: Vec<String>,
    pub reconnect_token: Option<Vec<u8>>,
    pub connector_id: String,
    pub version: String,
    pub os_arch: String,
    pub tags: Vec<ferrule_core::tag::Tag>,
}

/// What the edge returns on successful registration.
#[derive(Clone, Debug)]
pub struct RegisterReply {
    pub reconnect_token: Vec<u8>,
    pub reconnect_token_ttl: std::time::Duration,
    pub server_info: String,
    pub negotiated_features: Vec<String>,
}

/// Receiving half for inbound QUIC datagrams. `None` for transports that
/// don't support datagrams (framed-mux must refuse, per `spec.md` §4.C).
pub type DatagramReceiver = mpsc::Receiver<Bytes>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Current lifecycle state, for the Connection Worker and Diagnostic
    /// Collector.
    fn state(&self) -> ConnectionState;

    /// Perform the one-shot registration RPC. Must be called exactly once,
    /// after the secure channel is established and before `accept` is
    /// polled for inbound streams (`spec.md` §4.C, §4.L). `ctx`'s deadline
    /// governs the RPC timeout.
    async fn register(
        &self,
        ctx: &ExecutionContext,
        request: RegisterRequest,
    ) -> Result<RegisterReply, TransportError>;

    /// Open a new logical stream, originated by this connector. Rare in
    /// practice — almost everything is edge-initiated.
    async fn open_stream(&self, ctx: &ExecutionContext) -> Result<BoxStream, TransportError>;

    /// Accept the next edge-initiated stream. The Connection Worker calls
    /// this in a loop for the lifetime of `live`/`draining`.
    async fn accept(&self, ctx: &ExecutionContext) -> Result<BoxStream, TransportError>;

    /// Send an unreliable datagram (QUIC only).
    async fn send_datagram(&self, bytes: Bytes) -> Result<(), TransportError>;

    /// Take ownership of the datagram receive channel. Returns `None` for
    /// framed-mux and on a second call (the channel is taken once).
    fn take_datagram_receiver(&self) -> Option<DatagramReceiver>;

    /// Begin graceful close: refuse new streams, let existing ones finish
    /// for up to `grace_period`, then force-close (`spec.md` §4.C graceful
    /// close). Idempotent.
    async fn close(&self, ctx: &ExecutionContext, reason: CloseReason, grace_period: std::time::Duration);

    /// Resolve once the transport has transitioned to `Closed`, yielding
    /// the reason. Used by the Connection Worker to learn about
    /// edge-initiated or failure-driven closes without polling `state()`.
    async fn closed(&self) -> CloseReason;
}

pub type BoxTransport = std::sync::Arc<dyn Transport>;
