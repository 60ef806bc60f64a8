//! The [`Stream`] abstraction (`spec.md` §3, §4.C stream lifecycle).

use std::collections::HashMap;

use ferrule_core::ids::{ConnectionId, StreamId};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StreamDirection {
    /// Opened by this connector (rare — mostly control RPC).
    Outbound,
    /// Opened by the edge; the common case for ingress traffic.
    Inbound,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StreamState {
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    /// Apply a local half-close (handler wrote a zero-length terminator).
    pub fn close_local(self) -> Self {
        match self {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        }
    }

    /// Apply a remote half-close (END_STREAM flag received).
    pub fn close_remote(self) -> Self {
        match self {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        }
    }

    pub fn is_closed(self) -> bool {
        matches!(self, StreamState::Closed)
    }
}

/// Ingress metadata carried by the first HEADERS frame: either an
/// authority/path pair for HTTP ingress routing, or a `jump-destination`
/// for bastion/tcp-any streams (glossary: "Jump destination").
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub authority: Option<String>,
    pub path: Option<String>,
    pub jump_destination: Option<String>,
    pub headers: HashMap<String, String>,
}

/// A bidirectional byte stream multiplexed over one [`crate::Transport`]
/// connection. Readable/writable halves are exposed via `AsyncRead`/
/// `AsyncWrite` so the Origin Dialer can pump bytes with the ordinary
/// `tokio::io::copy_bidirectional` machinery; flow-control accounting
/// happens inside the concrete implementation's `poll_read`/`poll_write`,
/// not at this layer.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {
    fn id(&self) -> StreamId;
    fn connection_id(&self) -> ConnectionId;
    fn direction(&self) -> StreamDirection;
    fn state(&self) -> StreamState;
    fn metadata(&self) -> &StreamMetadata;
}

pub type BoxStream = Box<dyn Stream>;
