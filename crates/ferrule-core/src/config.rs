//! Cross-field validation for the CLI-level configuration contract
//! (`spec.md` §6, §7). The concrete `Config` struct a collaborator CLI
//! parser builds lives in `ferruled`; this module only knows the two
//! invariants whose violation is fatal at startup regardless of which
//! collaborator produced the values.

use std::net::{IpAddr, SocketAddr};

use crate::error::{codes, CoreError, ErrorKind};
use crate::net::IpFamily;
use crate::protocol::{ProtocolChoice, RequestedProtocol};

/// `spec.md` §7 Configuration errors: "contradictory flags (e.g. strict-PQ
/// with explicit non-QUIC)" and the `edge-bind-address`/`edge-ip-version`
/// boundary case from §8. Called once at startup before any worker dials.
pub fn validate_protocol_and_family(
    requested_protocol: RequestedProtocol,
    strict_pq: bool,
    edge_ip_version: IpFamily,
    edge_bind_address: Option<IpAddr>,
) -> Result<(), CoreError> {
    if strict_pq && matches!(requested_protocol, RequestedProtocol::Explicit(ProtocolChoice::FramedMux)) {
        return Err(CoreError::new(
            codes::STRICT_PQ_VIOLATION,
            ErrorKind::Configuration,
            "post-quantum strict mode requires quic; an explicit framed-mux protocol request is contradictory",
        ));
    }

    if let Some(address) = edge_bind_address {
        let probe = SocketAddr::new(address, 0);
        if !edge_ip_version.accepts(&probe) {
            return Err(CoreError::new(
                codes::BIND_FAMILY_MISMATCH,
                ErrorKind::Configuration,
                format!("edge-bind-address `{address}` does not match edge-ip-version `{edge_ip_version:?}`"),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_pq_with_explicit_framed_mux_is_rejected() {
        let err = validate_protocol_and_family(
            RequestedProtocol::Explicit(ProtocolChoice::FramedMux),
            true,
            IpFamily::Auto,
            None,
        )
        .unwrap_err();
        assert_eq!(err.code(), codes::STRICT_PQ_VIOLATION);
    }

    #[test]
    fn strict_pq_with_explicit_quic_is_accepted() {
        validate_protocol_and_family(
            RequestedProtocol::Explicit(ProtocolChoice::Quic),
            true,
            IpFamily::Auto,
            None,
        )
        .unwrap();
    }

    #[test]
    fn ipv4_bind_address_with_v6_only_is_rejected() {
        let err = validate_protocol_and_family(
            RequestedProtocol::Auto,
            false,
            IpFamily::V6Only,
            Some("10.0.0.1".parse().unwrap()),
        )
        .unwrap_err();
        assert_eq!(err.code(), codes::BIND_FAMILY_MISMATCH);
    }

    #[test]
    fn matching_bind_address_and_family_is_accepted() {
        validate_protocol_and_family(
            RequestedProtocol::Auto,
            false,
            IpFamily::V4Only,
            Some("10.0.0.1".parse().unwrap()),
        )
        .unwrap();
    }
}
