//! [`TransportFactory`]: the thing a Connection Worker asks for "dial me
//! a live encrypted connection to this address" (`spec.md` §4.C, §4.H
//! `dialing` state). Implemented by `ferrule-transport-mux` and
//! `ferrule-transport-quic`.

use async_trait::async_trait;
use ferrule_core::context::ExecutionContext;
use ferrule_core::net::EdgeAddress;

use crate::error::TransportError;
use crate::transport::BoxTransport;

#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// The `ProtocolChoice` this factory dials, for logging/diagnostics.
    fn protocol(&self) -> ferrule_core::protocol::ProtocolChoice;

    /// Establish the encrypted channel and return a live `Transport`
    /// *before* registration — the caller (Connection Worker) drives
    /// `register` itself so it can classify auth/server-busy/incompatible
    /// failures per `spec.md` §4.H.
    async fn dial(
        &self,
        ctx: &ExecutionContext,
        address: &EdgeAddress,
    ) -> Result<BoxTransport, TransportError>;
}
