//! [`ProtocolChoice`] and the user-facing request that selects it
//! (`spec.md` §3, §4.B).

use std::fmt;

/// The transport protocol a Connection Worker actually dials with.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ProtocolChoice {
    FramedMux,
    Quic,
}

impl ProtocolChoice {
    /// The other protocol, for Protocol Selector rotation
    /// (`spec.md` §4.B policy 3).
    pub fn other(self) -> Self {
        match self {
            ProtocolChoice::FramedMux => ProtocolChoice::Quic,
            ProtocolChoice::Quic => ProtocolChoice::FramedMux,
        }
    }
}

impl fmt::Display for ProtocolChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProtocolChoice::FramedMux => "framed-mux",
            ProtocolChoice::Quic => "quic",
        })
    }
}

/// User/CLI-level request, before the Protocol Selector resolves it to a
/// concrete [`ProtocolChoice`] (`spec.md` §6 `protocol`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
pub enum RequestedProtocol {
    #[default]
    Auto,
    Explicit(ProtocolChoice),
}

impl fmt::Display for RequestedProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestedProtocol::Auto => f.write_str("auto"),
            RequestedProtocol::Explicit(p) => fmt::Display::fmt(p, f),
        }
    }
}
