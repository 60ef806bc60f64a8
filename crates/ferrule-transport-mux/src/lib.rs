//! Framed-mux (HTTP/2-shaped) transport implementation (`spec.md` §4.C).
//! Multiplexes many logical streams and a reserved control channel over a
//! single TLS connection, with per-stream and per-connection flow-control
//! windows and a pluggable header-compression quality.

pub mod config;
pub mod connection;
pub mod factory;
pub mod frame;
pub mod header_codec;
pub mod stream;

pub use config::MuxConfig;
pub use connection::MuxConnection;
pub use factory::MuxTransportFactory;
pub use frame::{Frame, FrameCodec, FrameType};
pub use header_codec::HeaderQuality;
pub use stream::MuxStream;
