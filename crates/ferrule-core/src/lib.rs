//! Shared foundation for the ferrule edge connector core: stable ids, the
//! error taxonomy from `spec.md` §7, cancellation/deadline propagation,
//! a clock seam, backoff, credentials, and tag parsing.
//!
//! Every other `ferrule-*` crate depends on this one and nothing depends
//! the other way — it has no knowledge of transports, routing, or the
//! supervisor.

pub mod backoff;
pub mod clock;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod ids;
pub mod net;
pub mod protocol;
pub mod tag;

pub use clock::{Clock, SystemClock};
pub use context::ExecutionContext;
pub use credentials::{CredentialsFile, TunnelIdentity};
pub use error::{CoreError, ErrorKind};
pub use ids::{ConnectionId, ConnectorId, FlowId, SlotIndex, StreamId, TunnelId};
pub use net::{EdgeAddress, IpFamily};
pub use protocol::{ProtocolChoice, RequestedProtocol};
pub use tag::Tag;
