//! Transport-layer error enum, converted into [`ferrule_core::CoreError`]
//! at the Connection Worker boundary.

use ferrule_core::error::{codes, CoreError, ErrorKind};
use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum TransportError {
    #[error("registration rejected by edge: {reason}")]
    AuthRejected { reason: String },

    #[error("edge reported server-busy during registration")]
    ServerBusy,

    #[error("edge reported protocol-incompatible during registration")]
    ProtocolIncompatible,

    #[error("registration RPC timed out")]
    RegisterTimeout,

    #[error("heartbeat timeout: {unacked} unacknowledged pings")]
    HeartbeatTimeout { unacked: u32 },

    #[error("flow control violation: {detail}")]
    FlowControlViolation { detail: String },

    #[error("malformed frame: {detail}")]
    MalformedFrame { detail: String },

    #[error("i/o error: {detail}")]
    Io { detail: String },

    #[error("datagrams are not supported on this transport")]
    DatagramsUnsupported,

    #[error("stream rejected: {detail}")]
    StreamReset { detail: String },

    #[error("transport is draining or closed")]
    Closed,
}

impl From<TransportError> for CoreError {
    fn from(value: TransportError) -> Self {
        match &value {
            TransportError::AuthRejected { .. } => CoreError::new(
                codes::AUTH_REJECTED,
                ErrorKind::Credential,
                value.to_string(),
            ),
            TransportError::ServerBusy => {
                CoreError::new(codes::SERVER_BUSY, ErrorKind::TransportTransient, value.to_string())
            }
            TransportError::ProtocolIncompatible => CoreError::new(
                codes::PROTOCOL_INCOMPATIBLE,
                ErrorKind::TransportFatalForSlot,
                value.to_string(),
            ),
            TransportError::RegisterTimeout => CoreError::new(
                "transport.register_timeout",
                ErrorKind::TransportTransient,
                value.to_string(),
            ),
            TransportError::HeartbeatTimeout { .. } => CoreError::new(
                codes::HEARTBEAT_TIMEOUT,
                ErrorKind::TransportTransient,
                value.to_string(),
            ),
            TransportError::FlowControlViolation { .. } => CoreError::new(
                codes::FLOW_CONTROL_VIOLATION,
                ErrorKind::Stream,
                value.to_string(),
            ),
            TransportError::MalformedFrame { .. } => CoreError::new(
                "transport.malformed_frame",
                ErrorKind::TransportTransient,
                value.to_string(),
            ),
            TransportError::Io { .. } => CoreError::new(
                "transport.io_error",
                ErrorKind::TransportTransient,
                value.to_string(),
            ),
            TransportError::DatagramsUnsupported => CoreError::new(
                "transport.datagrams_unsupported",
                ErrorKind::Configuration,
                value.to_string(),
            ),
            TransportError::StreamReset { .. } => {
                CoreError::new("transport.stream_reset", ErrorKind::Stream, value.to_string())
            }
            TransportError::Closed => {
                CoreError::new("transport.closed", ErrorKind::Shutdown, value.to_string())
            }
        }
    }
}
