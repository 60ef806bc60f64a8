//! Tunables for [`crate::factory::QuicTransportFactory`] (`spec.md` §4.C,
//! §6). Idle timeout is derived from the heartbeat interval and count
//! rather than configured separately, per `spec.md` §4.C: "idle timeout =
//! heartbeat interval * (heartbeat count + 1)".

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct QuicConfig {
    pub connection_window: u32,
    pub stream_window: u32,
    pub heartbeat_interval: Duration,
    pub heartbeat_max_unacked: u32,
    pub register_timeout: Duration,
    pub close_grace_period: Duration,
    /// Whether to run PMTU discovery. Disabling it caps outbound datagrams
    /// at `ferrule_transport::QUIC_DATAGRAM_CAP_NO_PMTU` bytes.
    pub pmtu_discovery: bool,
    pub server_name: String,
}

impl QuicConfig {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            connection_window: ferrule_transport::QUIC_DEFAULT_CONNECTION_WINDOW,
            stream_window: ferrule_transport::QUIC_DEFAULT_STREAM_WINDOW,
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_max_unacked: 2,
            register_timeout: Duration::from_secs(10),
            close_grace_period: Duration::from_secs(30),
            pmtu_discovery: true,
            server_name: server_name.into(),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.heartbeat_interval * (self.heartbeat_max_unacked + 1)
    }

    pub fn datagram_cap(&self) -> usize {
        if self.pmtu_discovery {
            usize::MAX
        } else {
            ferrule_transport::QUIC_DATAGRAM_CAP_NO_PMTU
        }
    }
}
