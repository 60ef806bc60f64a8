//! Knobs shared by every Connection Worker in one Supervisor, lifted
//! straight from the CLI-level contract (`spec.md` §6).

use std::time::Duration;

use ferrule_core::protocol::RequestedProtocol;

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub requested_protocol: RequestedProtocol,
    pub strict_pq: bool,
    pub protocol_max_failures: u32,
    pub protocol_cooldown: Duration,

    pub heartbeat_interval: Duration,
    pub heartbeat_count: u32,
    pub rpc_timeout: Duration,
    pub write_stream_timeout: Duration,
    pub dial_edge_timeout: Duration,
    pub grace_period: Duration,

    pub retries: u32,
    pub max_edge_addr_retries: u32,

    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            requested_protocol: RequestedProtocol::Auto,
            strict_pq: false,
            protocol_max_failures: 3,
            protocol_cooldown: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_count: 5,
            rpc_timeout: Duration::from_secs(5),
            write_stream_timeout: Duration::from_secs(30),
            dial_edge_timeout: Duration::from_secs(10),
            grace_period: Duration::from_secs(30),
            retries: 5,
            max_edge_addr_retries: 8,
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub ha_connections: usize,
    pub worker: WorkerConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self { ha_connections: 4, worker: WorkerConfig::default() }
    }
}
