//! Plain configuration surface mirroring the CLI-level contract of
//! `spec.md` §6. The actual command-line parser, YAML config-file loader
//! and browser-based login flow are out of scope (`spec.md` §1) — they are
//! collaborators that build one of these and hand it to [`crate::run`].
//! Reading it here from environment variables is this binary's stand-in
//! for that collaborator, not a reimplementation of it.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use ferrule_core::error::{CoreError, ErrorKind};
use ferrule_core::net::IpFamily;
use ferrule_core::protocol::{ProtocolChoice, RequestedProtocol};
use ferrule_core::tag::Tag;

/// `spec.md` §6 "CLI-level contract". Field names match the flags they
/// mirror; durations and counts use their CLI defaults.
#[derive(Clone, Debug)]
pub struct Config {
    pub metrics_listen_address: Option<std::net::SocketAddr>,

    pub edge_hostname: String,
    pub edge_port: u16,
    pub edge_ip_version: IpFamily,
    pub edge_bind_address: Option<IpAddr>,

    pub requested_protocol: RequestedProtocol,
    pub post_quantum: bool,

    pub ha_connections: usize,

    pub heartbeat_interval: Duration,
    pub heartbeat_count: u32,
    pub rpc_timeout: Duration,
    pub write_stream_timeout: Duration,
    pub dial_edge_timeout: Duration,
    pub grace_period: Duration,

    pub retries: u32,
    pub max_edge_addr_retries: u32,

    pub tags: Vec<Tag>,

    pub quic_disable_pmtu_discovery: bool,
    pub quic_connection_level_flow_control_limit: u32,
    pub quic_stream_level_flow_control_limit: u32,

    pub max_active_flows: usize,
    pub funnel_timeout: Duration,
    pub max_ingress_rules: usize,
    pub icmpv4_src: Option<IpAddr>,
    pub icmpv6_src: Option<IpAddr>,

    pub origincert_path: Option<PathBuf>,
    pub credentials_path: PathBuf,
    pub config_file_path: Option<PathBuf>,

    pub management_hostname: Option<String>,
}

impl Config {
    /// Reads the contract from environment variables, applying the same
    /// defaults as `spec.md` §6 where it names one (`ha-connections=4`,
    /// `retries`, ...). Unset required fields (`edge`, credentials path)
    /// are errors, not panics, same as a bad flag would be from a real CLI
    /// parser.
    pub fn from_env() -> Result<Self, CoreError> {
        let edge_hostname = require_env("FERRULE_EDGE_HOSTNAME")?;
        let edge_port = env_or("FERRULE_EDGE_PORT", 7844)?;
        let credentials_path = PathBuf::from(require_env("FERRULE_CREDENTIALS_FILE")?);

        let mut tags = Vec::new();
        if let Ok(raw) = std::env::var("FERRULE_TAGS") {
            for entry in raw.split(',').filter(|s| !s.is_empty()) {
                tags.push(Tag::parse(entry)?);
            }
        }

        let requested_protocol = match std::env::var("FERRULE_PROTOCOL").as_deref() {
            Ok("framed-mux") => RequestedProtocol::Explicit(ProtocolChoice::FramedMux),
            Ok("quic") => RequestedProtocol::Explicit(ProtocolChoice::Quic),
            _ => RequestedProtocol::Auto,
        };

        let edge_ip_version = match std::env::var("FERRULE_EDGE_IP_VERSION").as_deref() {
            Ok("4") => IpFamily::V4Only,
            Ok("6") => IpFamily::V6Only,
            _ => IpFamily::Auto,
        };

        let edge_bind_address = std::env::var("FERRULE_EDGE_BIND_ADDRESS")
            .ok()
            .map(|raw| {
                raw.parse::<IpAddr>().map_err(|e| {
                    CoreError::new(
                        "config.invalid_bind_address",
                        ErrorKind::Configuration,
                        format!("`{raw}` is not a valid IP literal: {e}"),
                    )
                })
            })
            .transpose()?;

        Ok(Self {
            metrics_listen_address: None,
            edge_hostname,
            edge_port,
            edge_ip_version,
            edge_bind_address,
            requested_protocol,
            post_quantum: env_flag("FERRULE_POST_QUANTUM"),
            ha_connections: env_or("FERRULE_HA_CONNECTIONS", 4)?,
            heartbeat_interval: Duration::from_secs(env_or("FERRULE_HEARTBEAT_INTERVAL_SECS", 5)?),
            heartbeat_count: env_or("FERRULE_HEARTBEAT_COUNT", 5)?,
            rpc_timeout: Duration::from_secs(env_or("FERRULE_RPC_TIMEOUT_SECS", 5)?),
            write_stream_timeout: Duration::from_secs(env_or("FERRULE_WRITE_STREAM_TIMEOUT_SECS", 30)?),
            dial_edge_timeout: Duration::from_secs(env_or("FERRULE_DIAL_EDGE_TIMEOUT_SECS", 10)?),
            grace_period: Duration::from_secs(env_or("FERRULE_GRACE_PERIOD_SECS", 30)?),
            retries: env_or("FERRULE_RETRIES", 5)?,
            max_edge_addr_retries: env_or("FERRULE_MAX_EDGE_ADDR_RETRIES", 8)?,
            tags,
            quic_disable_pmtu_discovery: env_flag("FERRULE_QUIC_DISABLE_PMTU_DISCOVERY"),
            quic_connection_level_flow_control_limit: env_or(
                "FERRULE_QUIC_CONNECTION_LEVEL_FLOW_CONTROL_LIMIT",
                ferrule_transport::QUIC_DEFAULT_CONNECTION_WINDOW,
            )?,
            quic_stream_level_flow_control_limit: env_or(
                "FERRULE_QUIC_STREAM_LEVEL_FLOW_CONTROL_LIMIT",
                ferrule_transport::QUIC_DEFAULT_STREAM_WINDOW,
            )?,
            max_active_flows: env_or("FERRULE_MAX_ACTIVE_FLOWS", 8192)?,
            funnel_timeout: Duration::from_secs(env_or("FERRULE_FUNNEL_TIMEOUT_SECS", 10)?),
            max_ingress_rules: env_or(
                "FERRULE_MAX_INGRESS_RULES",
                ferrule_router::DEFAULT_MAX_INGRESS_RULES,
            )?,
            icmpv4_src: None,
            icmpv6_src: None,
            origincert_path: std::env::var("FERRULE_ORIGINCERT").ok().map(PathBuf::from),
            credentials_path,
            config_file_path: std::env::var("FERRULE_CONFIG_FILE").ok().map(PathBuf::from),
            management_hostname: std::env::var("FERRULE_MANAGEMENT_HOSTNAME").ok(),
        })
    }

    /// Cross-field invariants that are fatal at startup (`spec.md` §7, §8).
    pub fn validate(&self) -> Result<(), CoreError> {
        ferrule_core::config::validate_protocol_and_family(
            self.requested_protocol,
            self.post_quantum,
            self.edge_ip_version,
            self.edge_bind_address,
        )
    }
}

fn require_env(key: &str) -> Result<String, CoreError> {
    std::env::var(key).map_err(|_| {
        CoreError::new(
            "config.missing_required_value",
            ErrorKind::Configuration,
            format!("`{key}` must be set"),
        )
    })
}

fn env_flag(key: &str) -> bool {
    matches!(std::env::var(key).as_deref(), Ok("1") | Ok("true"))
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, CoreError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| {
            CoreError::new(
                "config.invalid_value",
                ErrorKind::Configuration,
                format!("`{key}` = `{raw}` is not valid"),
            )
        }),
        Err(_) => Ok(default),
    }
}
