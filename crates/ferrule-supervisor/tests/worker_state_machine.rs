//! Integration tests driving `ConnectionWorker::run` through its full
//! state machine against a scripted `Transport`/`TransportFactory` double,
//! in place of a real framed-mux or QUIC connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ferrule_core::context::ExecutionContext;
use ferrule_core::credentials::TunnelIdentity;
use ferrule_core::error::codes;
use ferrule_core::ids::{ConnectorId, TunnelId};
use ferrule_core::net::{EdgeAddress, IpFamily};
use ferrule_core::protocol::{ProtocolChoice, RequestedProtocol};
use ferrule_dialer::{HttpDialer, OriginDialer, ReservedDnsResolver, TcpDialer};
use ferrule_flow::FlowTable;
use ferrule_observer::Observer;
use ferrule_pool::{AddressBook, ProtocolSelector};
use ferrule_router::{IngressRouter, Orchestrator, OriginRequestDefaults, RuleSet, ServiceDescriptor, WarpRoutingConfig};
use ferrule_supervisor::config::WorkerConfig;
use ferrule_supervisor::worker::{ConnectionWorker, WorkerCommand};
use ferrule_transport::connection::{CloseReason, ConnectionState};
use ferrule_transport::error::TransportError;
use ferrule_transport::factory::TransportFactory;
use ferrule_transport::stream::BoxStream;
use ferrule_transport::transport::{BoxTransport, DatagramReceiver, RegisterReply, RegisterRequest, Transport};
use tokio::sync::{mpsc, oneshot, Notify};

#[derive(Clone, Copy)]
enum ScriptedRegister {
    Success,
    AuthRejected,
    ProtocolIncompatible,
}

struct ScriptedTransport {
    register_outcome: ScriptedRegister,
    closed_once: AtomicBool,
    close_reason: Mutex<CloseReason>,
    closed: Notify,
}

impl ScriptedTransport {
    fn new(register_outcome: ScriptedRegister) -> Arc<Self> {
        Arc::new(Self {
            register_outcome,
            closed_once: AtomicBool::new(false),
            close_reason: Mutex::new(CloseReason::RemoteGoAway),
            closed: Notify::new(),
        })
    }

    /// Simulates an edge-initiated close, arriving on its own after `after`
    /// rather than in response to a worker-driven `close()` call.
    fn schedule_remote_close(self: &Arc<Self>, after: Duration, reason: CloseReason) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if !this.closed_once.swap(true, Ordering::SeqCst) {
                *this.close_reason.lock().unwrap() = reason;
                this.closed.notify_waiters();
            }
        });
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn state(&self) -> ConnectionState {
        ConnectionState::Live
    }

    async fn register(&self, _ctx: &ExecutionContext, _request: RegisterRequest) -> Result<RegisterReply, TransportError> {
        match self.register_outcome {
            ScriptedRegister::Success => Ok(RegisterReply {
                reconnect_token: vec![1, 2, 3],
                reconnect_token_ttl: Duration::from_secs(60),
                server_info: "mock-edge".to_string(),
                negotiated_features: Vec::new(),
            }),
            ScriptedRegister::AuthRejected => Err(TransportError::AuthRejected { reason: "bad secret".to_string() }),
            ScriptedRegister::ProtocolIncompatible => Err(TransportError::ProtocolIncompatible),
        }
    }

    async fn open_stream(&self, _ctx: &ExecutionContext) -> Result<BoxStream, TransportError> {
        Err(TransportError::Closed)
    }

    async fn accept(&self, _ctx: &ExecutionContext) -> Result<BoxStream, TransportError> {
        // These tests never push an inbound stream; the `live` loop is
        // exercised instead through `closed()` and the command channel.
        std::future::pending().await
    }

    async fn send_datagram(&self, _bytes: Bytes) -> Result<(), TransportError> {
        Ok(())
    }

    fn take_datagram_receiver(&self) -> Option<DatagramReceiver> {
        None
    }

    async fn close(&self, _ctx: &ExecutionContext, reason: CloseReason, _grace_period: Duration) {
        if !self.closed_once.swap(true, Ordering::SeqCst) {
            *self.close_reason.lock().unwrap() = reason;
            self.closed.notify_waiters();
        }
    }

    async fn closed(&self) -> CloseReason {
        self.closed.notified().await;
        self.close_reason.lock().unwrap().clone()
    }
}

/// Hands out a fresh `ScriptedTransport` per dial, tracking how many dials
/// have happened so tests can script different outcomes per attempt.
struct ScriptedFactory<F> {
    dial_count: AtomicUsize,
    build: F,
}

impl<F> ScriptedFactory<F>
where
    F: Fn(usize) -> Arc<ScriptedTransport> + Send + Sync,
{
    fn new(build: F) -> Self {
        Self { dial_count: AtomicUsize::new(0), build }
    }
}

#[async_trait]
impl<F> TransportFactory for ScriptedFactory<F>
where
    F: Fn(usize) -> Arc<ScriptedTransport> + Send + Sync,
{
    fn protocol(&self) -> ProtocolChoice {
        ProtocolChoice::FramedMux
    }

    async fn dial(&self, _ctx: &ExecutionContext, _address: &EdgeAddress) -> Result<BoxTransport, TransportError> {
        let attempt = self.dial_count.fetch_add(1, Ordering::SeqCst);
        Ok((self.build)(attempt))
    }
}

struct Harness {
    worker: Arc<ConnectionWorker>,
    first_connected_rx: oneshot::Receiver<()>,
}

async fn build_harness<F>(build: F) -> Harness
where
    F: Fn(usize) -> Arc<ScriptedTransport> + Send + Sync + 'static,
{
    let identity = Arc::new(TunnelIdentity {
        tunnel_id: TunnelId(uuid::Uuid::new_v4()),
        account_tag: "test-account".to_string(),
        shared_secret: vec![0u8; 32],
        tunnel_name: None,
        endpoint: None,
    });

    let address_book = Arc::new(AddressBook::new("127.0.0.1", 7844, IpFamily::V4Only, Duration::from_secs(30)));
    address_book.refresh().await.expect("loopback address must resolve and bind-verify");

    let protocol_selector = Arc::new(ProtocolSelector::new(RequestedProtocol::Auto, false, 3, Duration::from_secs(60)));

    let ruleset = RuleSet::new(
        vec![ferrule_router::IngressRule::new(
            ferrule_router::HostnamePattern::CatchAll,
            None,
            ServiceDescriptor::HelloWorld,
            OriginRequestDefaults::default(),
        )
        .unwrap()],
        WarpRoutingConfig::default(),
        OriginRequestDefaults::default(),
    );
    let orchestrator = Arc::new(Orchestrator::new(ruleset));
    let ingress_router = Arc::new(IngressRouter::new(None).unwrap());

    let dialer = Arc::new(OriginDialer::new(
        HttpDialer::new(8, Duration::from_secs(90), Duration::from_secs(5)),
        TcpDialer::new(Duration::from_secs(5)),
        ReservedDnsResolver::new(HashMap::new()),
    ));

    let flow_table = Arc::new(FlowTable::new(Duration::from_secs(60), 1024));
    let observer = Arc::new(Observer::new());

    let mux_factory: Arc<dyn TransportFactory> = Arc::new(ScriptedFactory::new(build));
    let quic_factory: Arc<dyn TransportFactory> = mux_factory.clone();

    let mut config = WorkerConfig::default();
    config.backoff_initial = Duration::from_millis(5);
    config.backoff_max = Duration::from_millis(20);
    config.dial_edge_timeout = Duration::from_secs(2);
    config.rpc_timeout = Duration::from_secs(2);
    config.grace_period = Duration::from_millis(50);

    let (first_connected_tx, first_connected_rx) = oneshot::channel();
    let worker = Arc::new(ConnectionWorker::new(
        0,
        config,
        identity,
        ConnectorId::generate(),
        "0.0.0-test".to_string(),
        "linux-amd64".to_string(),
        Vec::new(),
        Vec::new(),
        address_book,
        protocol_selector,
        mux_factory,
        quic_factory,
        orchestrator,
        ingress_router,
        dialer,
        flow_table,
        observer,
        first_connected_tx,
    ));

    Harness { worker, first_connected_rx }
}

#[tokio::test]
async fn auth_rejected_stops_the_slot_permanently() {
    let harness = build_harness(|_attempt| ScriptedTransport::new(ScriptedRegister::AuthRejected)).await;
    let (_tx, rx) = mpsc::channel(4);
    let ctx = ExecutionContext::root();

    let result = harness.worker.run(ctx, rx).await;
    let err = result.expect("auth-rejected must return a fatal error, not loop forever");
    assert_eq!(err.code(), codes::AUTH_REJECTED);
}

#[tokio::test]
async fn protocol_incompatible_backs_off_and_retries_until_cancelled() {
    let harness = build_harness(|attempt| {
        if attempt == 0 {
            ScriptedTransport::new(ScriptedRegister::ProtocolIncompatible)
        } else {
            ScriptedTransport::new(ScriptedRegister::Success)
        }
    })
    .await;
    let (_tx, rx) = mpsc::channel(4);
    let ctx = ExecutionContext::root();
    let cancel_ctx = ctx.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(80)).await;
        cancel_ctx.cancel();
    });

    let result = harness.worker.run(ctx, rx).await;
    assert!(result.is_none(), "cancellation must stop the worker cleanly, not surface an error");
}

#[tokio::test]
async fn successful_register_fires_first_connected_exactly_once() {
    let mut harness = build_harness(|_attempt| ScriptedTransport::new(ScriptedRegister::Success)).await;
    let (_tx, rx) = mpsc::channel(4);
    let ctx = ExecutionContext::root();
    let cancel_ctx = ctx.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        cancel_ctx.cancel();
    });

    let run_handle = tokio::spawn(harness.worker.clone().run(ctx, rx));
    harness.first_connected_rx.await.expect("first-connected oneshot must fire on a successful register");

    let result = run_handle.await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn remote_goaway_triggers_backoff_then_a_clean_reconnect() {
    let first_closed = Arc::new(AtomicBool::new(false));
    let first_closed_marker = first_closed.clone();

    let harness = build_harness(move |attempt| {
        let transport = ScriptedTransport::new(ScriptedRegister::Success);
        if attempt == 0 {
            first_closed_marker.store(true, Ordering::SeqCst);
            transport.schedule_remote_close(Duration::from_millis(10), CloseReason::RemoteGoAway);
        }
        transport
    })
    .await;
    let (_tx, rx) = mpsc::channel(4);
    let ctx = ExecutionContext::root();
    let cancel_ctx = ctx.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel_ctx.cancel();
    });

    let result = harness.worker.run(ctx, rx).await;
    assert!(result.is_none());
    assert!(first_closed.load(Ordering::SeqCst), "the first dial must have been exercised");
}

#[tokio::test]
async fn drain_command_ends_the_worker_without_an_error() {
    let harness = build_harness(|_attempt| ScriptedTransport::new(ScriptedRegister::Success)).await;
    let (tx, rx) = mpsc::channel(4);
    let ctx = ExecutionContext::root();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let _ = tx.send(WorkerCommand::Drain).await;
    });

    let result = harness.worker.run(ctx, rx).await;
    assert!(result.is_none(), "a drain command must end the worker cleanly");
}
