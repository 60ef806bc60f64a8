//! Transport abstraction layer (`spec.md` §4.C). Defines the `Transport`
//! and `TransportFactory` traits that `ferrule-transport-mux` and
//! `ferrule-transport-quic` implement, plus the shared building blocks
//! both implementations need: flow-control windows, heartbeat tracking,
//! stream/connection state, and the transport error taxonomy.

pub mod connection;
pub mod error;
pub mod factory;
pub mod flow_window;
pub mod heartbeat;
pub mod stream;
pub mod transport;

pub use connection::{CloseReason, ConnectionInfo, ConnectionState, ReconnectToken};
pub use error::TransportError;
pub use factory::TransportFactory;
pub use flow_window::FlowWindow;
pub use heartbeat::HeartbeatMonitor;
pub use stream::{BoxStream, Stream, StreamDirection, StreamMetadata, StreamState};
pub use transport::{
    BoxTransport, DatagramReceiver, RegisterReply, RegisterRequest, Transport,
};

/// Default per-stream flow-control window (`spec.md` §4.C framed-mux: 64 KiB).
pub const DEFAULT_STREAM_WINDOW: u32 = 64 * 1024;
/// Minimum per-connection flow-control window (`spec.md` §4.C framed-mux).
pub const MIN_CONNECTION_WINDOW: u32 = 256 * 1024;
/// QUIC default connection-level flow-control limit (`spec.md` §4.C).
pub const QUIC_DEFAULT_CONNECTION_WINDOW: u32 = 30 * 1024 * 1024;
/// QUIC default stream-level flow-control limit (`spec.md` §4.C).
pub const QUIC_DEFAULT_STREAM_WINDOW: u32 = 6 * 1024 * 1024;
/// QUIC datagram cap when PMTU discovery is disabled (`spec.md` §4.C).
pub const QUIC_DATAGRAM_CAP_NO_PMTU: usize = 1200;
