//! Error taxonomy shared by every ferrule crate.
//!
//! `spec.md` §7 groups failures into seven kinds (configuration, credential,
//! transport-transient, transport-fatal-for-slot, stream, validation,
//! shutdown). [`ErrorKind`] names those groups; [`CoreError`] is the
//! concrete error type most public APIs return, carrying a stable code, a
//! human message and an optional source. Leaf crates are free to define
//! their own `thiserror` enums for fine-grained matching and convert them
//! into `CoreError` at their public boundary.

use std::fmt;

/// Coarse classification used to decide retry/backoff/shutdown policy.
///
/// Mirrors the taxonomy in `spec.md` §7. `Shutdown` is not really an error
/// (context cancellation) but is included so callers can match exhaustively
/// on one enum when deciding what to log versus what to escalate.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    Configuration,
    Credential,
    TransportTransient,
    TransportFatalForSlot,
    Stream,
    Validation,
    Shutdown,
}

impl ErrorKind {
    /// Whether a caller should retry after backoff. `Configuration` and
    /// `Credential` are fatal; `Stream` failures are per-stream and never
    /// drive connection-level retry on their own.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TransportTransient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Credential => "credential",
            ErrorKind::TransportTransient => "transport-transient",
            ErrorKind::TransportFatalForSlot => "transport-fatal-for-slot",
            ErrorKind::Stream => "stream",
            ErrorKind::Validation => "validation",
            ErrorKind::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// The crate-wide error type. Carries a stable `<domain>.<reason>` code (for
/// alerting/dashboards), a human message, and an [`ErrorKind`] that drives
/// automated handling (the Connection Worker's classify-and-act step in
/// `spec.md` §4.H, §7).
#[derive(Debug)]
pub struct CoreError {
    code: &'static str,
    kind: ErrorKind,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl CoreError {
    pub fn new(code: &'static str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code,
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.code, self.message)
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Stable error codes referenced directly by `spec.md` (e.g. `no-edge-addresses`,
/// `auth-rejected`). Kept as a flat module of `&'static str` constants rather
/// than an enum so downstream crates can add their own codes without a
/// shared registry crate.
pub mod codes {
    pub const NO_EDGE_ADDRESSES: &str = "pool.no_edge_addresses";
    pub const AUTH_REJECTED: &str = "transport.auth_rejected";
    pub const SERVER_BUSY: &str = "transport.server_busy";
    pub const PROTOCOL_INCOMPATIBLE: &str = "transport.protocol_incompatible";
    pub const HEARTBEAT_TIMEOUT: &str = "transport.heartbeat_timeout";
    pub const FLOW_CONTROL_VIOLATION: &str = "transport.flow_control_violation";
    pub const DNS_ERROR: &str = "dialer.dns_error";
    pub const CONNECTION_REFUSED: &str = "dialer.connection_refused";
    pub const TLS_HANDSHAKE_FAILED: &str = "dialer.tls_handshake_failed";
    pub const TIMEOUT_EXCEEDED: &str = "dialer.timeout_exceeded";
    pub const NO_RULE: &str = "router.no_rule";
    pub const INVALID_RULESET: &str = "router.invalid_ruleset";
    pub const RULESET_TOO_LARGE: &str = "router.ruleset_too_large";
    pub const STRICT_PQ_VIOLATION: &str = "config.strict_pq_violation";
    pub const BIND_FAMILY_MISMATCH: &str = "config.bind_family_mismatch";
    pub const MALFORMED_CREDENTIALS: &str = "credential.malformed";
    pub const FLOW_TABLE_FULL: &str = "flow.table_full";
}
