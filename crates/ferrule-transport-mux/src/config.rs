//! Tunable knobs for a [`crate::connection::MuxTransport`] (`spec.md` §4.C,
//! §6). Constructed by `ferruled` from the parsed configuration and shared
//! immutably by every dialed connection.

use std::time::Duration;

use crate::header_codec::HeaderQuality;

#[derive(Clone, Debug)]
pub struct MuxConfig {
    pub stream_window: u32,
    pub connection_window: u32,
    pub heartbeat_interval: Duration,
    pub heartbeat_max_unacked: u32,
    pub header_quality: HeaderQuality,
    pub register_timeout: Duration,
    pub close_grace_period: Duration,
    /// TLS server name used for SNI and certificate verification. Distinct
    /// from the dialed socket address, which may be any address in the
    /// Edge Address Book.
    pub server_name: String,
}

impl MuxConfig {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            stream_window: ferrule_transport::DEFAULT_STREAM_WINDOW,
            connection_window: ferrule_transport::MIN_CONNECTION_WINDOW,
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_max_unacked: 2,
            header_quality: HeaderQuality::Medium,
            register_timeout: Duration::from_secs(10),
            close_grace_period: Duration::from_secs(30),
            server_name: server_name.into(),
        }
    }
}
