//! Thin binary: loads credentials and configuration, wires every
//! `ferrule-*` crate into one running connector, and drives signal-based
//! shutdown (`spec.md` §6, §7).

mod config;
mod signals;

use std::collections::HashMap;
use std::sync::Arc;

use ferrule_core::context::ExecutionContext;
use ferrule_core::credentials::TunnelIdentity;
use ferrule_core::error::{CoreError, ErrorKind};
use ferrule_core::ids::ConnectorId;
use ferrule_dialer::{HttpDialer, OriginDialer, ReservedDnsResolver, TcpDialer};
use ferrule_flow::FlowTable;
use ferrule_observer::{Observer, ReadinessExporter};
use ferrule_pool::{AddressBook, ProtocolSelector};
use ferrule_router::{IngressRouter, Orchestrator, OriginRequestDefaults, RuleSet, WarpRoutingConfig};
use ferrule_supervisor::{SharedResources, Supervisor, SupervisorConfig, WorkerConfig};
use ferrule_transport::factory::TransportFactory;
use ferrule_transport_mux::{MuxConfig, MuxTransportFactory};
use ferrule_transport_quic::{QuicConfig, QuicTransportFactory};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

const EXIT_OK: i32 = 0;
const EXIT_CONFIGURATION_ERROR: i32 = 1;
const EXIT_CREDENTIAL_ERROR: i32 = 2;
const EXIT_BIND_FAILURE: i32 = 3;
const EXIT_FATAL_RUNTIME: i32 = 4;
const EXIT_FORCED_SHUTDOWN: i32 = 130;

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to start the async runtime");
            std::process::exit(EXIT_FATAL_RUNTIME);
        }
    };

    let exit_code = runtime.block_on(run());
    std::process::exit(exit_code);
}

async fn run() -> i32 {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => return exit_for_startup_error(&err),
    };
    if let Err(err) = config.validate() {
        return exit_for_startup_error(&err);
    }

    let identity = match load_identity(&config) {
        Ok(identity) => Arc::new(identity),
        Err(err) => return exit_for_startup_error(&err),
    };

    let resources = match build_resources(&config).await {
        Ok(resources) => resources,
        Err(err) => return exit_for_startup_error(&err),
    };

    tokio::spawn(evict_idle_flows_task(resources.flow_table.clone(), config.funnel_timeout));

    let (_readiness, _readiness_task) = ReadinessExporter::spawn(&resources.observer);

    let ctx = ExecutionContext::root();
    let connector_id = ConnectorId::generate();
    let version = env!("CARGO_PKG_VERSION").to_string();
    let os_arch = format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH);

    let supervisor_config = SupervisorConfig {
        ha_connections: config.ha_connections,
        worker: worker_config(&config),
    };

    let mut supervisor = Supervisor::spawn(
        &ctx,
        supervisor_config,
        identity,
        connector_id,
        version,
        os_arch,
        Vec::new(),
        config.tags.clone(),
        resources,
    );

    supervisor.wait_all_first_connected().await;
    tracing::info!(workers = supervisor.worker_count(), "connector is up");

    enum WakeReason {
        Signal(signals::SecondSignal),
        Fatal,
    }

    let wake_reason = tokio::select! {
        result = signals::wait_for_first_signal() => match result {
            Ok(second_signal) => WakeReason::Signal(second_signal),
            Err(e) => {
                tracing::error!(error = %e, "failed to install signal handlers");
                return EXIT_FATAL_RUNTIME;
            }
        },
        _ = supervisor.wait_for_fatal() => WakeReason::Fatal,
    };

    let mut second_signal = match wake_reason {
        WakeReason::Fatal => {
            tracing::error!("a worker reported a fatal error; shutting down");
            return shutdown_and_exit(supervisor, config.grace_period).await;
        }
        WakeReason::Signal(second_signal) => second_signal,
    };

    tracing::info!("shutdown signal received, draining");
    let shutdown_fut = shutdown_and_exit(supervisor, config.grace_period);
    tokio::pin!(shutdown_fut);

    tokio::select! {
        code = &mut shutdown_fut => code,
        _ = second_signal.recv() => {
            tracing::warn!("second shutdown signal received, forcing immediate exit");
            ctx.cancel();
            EXIT_FORCED_SHUTDOWN
        }
    }
}

/// `FlowTable::evict_idle` does no sweeping on its own — its own doc comment
/// says the caller must invoke it periodically — so this is that caller,
/// running for the lifetime of the process (`spec.md` §4.G funnel idle
/// eviction). Ticks at half the funnel timeout, floored at one second, so a
/// flow is never more than roughly half a timeout late to be reaped.
async fn evict_idle_flows_task(flow_table: Arc<FlowTable>, funnel_timeout: std::time::Duration) {
    let sweep_interval = (funnel_timeout / 2).max(std::time::Duration::from_secs(1));
    let mut ticker = tokio::time::interval(sweep_interval);
    loop {
        ticker.tick().await;
        flow_table.evict_idle();
    }
}

async fn shutdown_and_exit(supervisor: Supervisor, grace_period: std::time::Duration) -> i32 {
    match supervisor.shutdown(grace_period).await {
        None => EXIT_OK,
        Some(err) => {
            tracing::error!(code = err.code(), kind = %err.kind(), message = err.message(), "connector exiting on a fatal error");
            match err.kind() {
                ErrorKind::Credential => EXIT_CREDENTIAL_ERROR,
                ErrorKind::Configuration => EXIT_CONFIGURATION_ERROR,
                _ => EXIT_FATAL_RUNTIME,
            }
        }
    }
}

fn exit_for_startup_error(err: &CoreError) -> i32 {
    tracing::error!(code = err.code(), kind = %err.kind(), message = err.message(), "failed to start");
    match err.kind() {
        ErrorKind::Credential => EXIT_CREDENTIAL_ERROR,
        ErrorKind::Configuration => EXIT_CONFIGURATION_ERROR,
        _ => EXIT_BIND_FAILURE,
    }
}

fn load_identity(config: &Config) -> Result<TunnelIdentity, CoreError> {
    let bytes = std::fs::read(&config.credentials_path).map_err(|e| {
        CoreError::new(
            "config.credentials_unreadable",
            ErrorKind::Credential,
            format!("reading `{}`: {e}", config.credentials_path.display()),
        )
    })?;
    TunnelIdentity::from_json(&bytes)
}

fn worker_config(config: &Config) -> WorkerConfig {
    WorkerConfig {
        requested_protocol: config.requested_protocol,
        strict_pq: config.post_quantum,
        protocol_max_failures: 3,
        protocol_cooldown: std::time::Duration::from_secs(60),
        heartbeat_interval: config.heartbeat_interval,
        heartbeat_count: config.heartbeat_count,
        rpc_timeout: config.rpc_timeout,
        write_stream_timeout: config.write_stream_timeout,
        dial_edge_timeout: config.dial_edge_timeout,
        grace_period: config.grace_period,
        retries: config.retries,
        max_edge_addr_retries: config.max_edge_addr_retries,
        backoff_initial: std::time::Duration::from_secs(1),
        backoff_max: std::time::Duration::from_secs(60),
    }
}

async fn build_resources(config: &Config) -> Result<SharedResources, CoreError> {
    let address_book = Arc::new(AddressBook::new(
        config.edge_hostname.clone(),
        config.edge_port,
        config.edge_ip_version,
        std::time::Duration::from_secs(60),
    ));
    address_book.refresh().await?;

    let protocol_selector = Arc::new(ProtocolSelector::new(
        config.requested_protocol,
        config.post_quantum,
        3,
        std::time::Duration::from_secs(60),
    ));

    let observer = Arc::new(Observer::new());
    let initial_ruleset = RuleSet::new(Vec::new(), WarpRoutingConfig::default(), OriginRequestDefaults::default());
    let orchestrator = Arc::new(
        Orchestrator::new(initial_ruleset)
            .with_rejection_sink(observer.clone())
            .with_max_rules(config.max_ingress_rules),
    );
    let ingress_router = Arc::new(IngressRouter::new(config.management_hostname.as_deref())?);

    let dialer = Arc::new(OriginDialer::new(
        HttpDialer::new(8, std::time::Duration::from_secs(90), config.dial_edge_timeout),
        TcpDialer::new(config.dial_edge_timeout),
        ReservedDnsResolver::new(HashMap::new()),
    ));

    let flow_table = Arc::new(FlowTable::new(config.funnel_timeout, config.max_active_flows));

    let edge_tls = ferrule_dialer::tls::build_client_config(false, config.origincert_path.as_deref())?;

    let mut mux_tls = edge_tls.clone();
    mux_tls.alpn_protocols = vec![b"ferrule-mux".to_vec()];
    let mux_config = MuxConfig::new(config.edge_hostname.clone());
    let mux_factory: Arc<dyn TransportFactory> = Arc::new(MuxTransportFactory::new(mux_tls, mux_config));

    let mut quic_tls = edge_tls;
    quic_tls.alpn_protocols = vec![b"h3".to_vec()];
    let mut quic_config = QuicConfig::new(config.edge_hostname.clone());
    quic_config.pmtu_discovery = !config.quic_disable_pmtu_discovery;
    quic_config.connection_window = config.quic_connection_level_flow_control_limit;
    quic_config.stream_window = config.quic_stream_level_flow_control_limit;
    let default_unspecified = if matches!(config.edge_ip_version, ferrule_core::net::IpFamily::V6Only) {
        std::net::IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
    } else {
        std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
    };
    let quic_bind = std::net::SocketAddr::new(config.edge_bind_address.unwrap_or(default_unspecified), 0);
    let quic_factory: Arc<dyn TransportFactory> = Arc::new(
        QuicTransportFactory::new(quic_bind, quic_tls, quic_config)
            .map_err(|e| CoreError::new("config.quic_endpoint_bind_failed", ErrorKind::Configuration, e.to_string()))?,
    );

    Ok(SharedResources {
        address_book,
        protocol_selector,
        orchestrator,
        ingress_router,
        dialer,
        flow_table,
        observer,
        mux_factory,
        quic_factory,
    })
}
