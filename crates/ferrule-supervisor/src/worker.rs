//! Connection Worker (`spec.md` §4.H): one worker per `PoolSlot`, driving
//! the state machine `idle → dialing → registering → live ⇄ draining →
//! closed → backoff → dialing …`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ferrule_core::backoff::{BackoffPolicy, BackoffState};
use ferrule_core::context::ExecutionContext;
use ferrule_core::credentials::TunnelIdentity;
use ferrule_core::error::{codes, CoreError, ErrorKind};
use ferrule_core::ids::{ConnectorId, SlotIndex};
use ferrule_core::protocol::ProtocolChoice;
use ferrule_core::tag::Tag;
use ferrule_dialer::{DatagramSocket, OriginDialer};
use ferrule_flow::{FlowId, FlowKey, FlowTable};
use ferrule_observer::Observer;
use ferrule_pool::{AddressBook, ProtocolSelector};
use ferrule_router::{IngressRouter, Orchestrator, RequestIdentity};
use ferrule_transport::connection::CloseReason;
use ferrule_transport::factory::TransportFactory;
use ferrule_transport::transport::{BoxTransport, RegisterRequest};
use tokio::sync::{mpsc, oneshot};

use crate::bootstrap;
use crate::config::WorkerConfig;
use crate::dispatch;

/// Commands relayed to one worker from the Supervisor (`spec.md` §4.H
/// `backoff`: "Honor ReconnectSignal from stdin-control", §4.I shutdown).
#[derive(Clone, Debug)]
pub enum WorkerCommand {
    /// `ReconnectSignal`, with an optional explicit delay override.
    Reconnect(Option<Duration>),
    /// Enter `draining` and do not reconnect afterward.
    Drain,
}

enum LiveExit {
    ShuttingDown,
    DrainRequested,
    Closed(CloseReason),
}

pub struct ConnectionWorker {
    pub index: SlotIndex,
    config: WorkerConfig,
    identity: Arc<TunnelIdentity>,
    connector_id: ConnectorId,
    version: String,
    os_arch: String,
    features: Vec<String>,
    tags: Vec<Tag>,
    address_book: Arc<AddressBook>,
    protocol_selector: Arc<ProtocolSelector>,
    mux_factory: Arc<dyn TransportFactory>,
    quic_factory: Arc<dyn TransportFactory>,
    orchestrator: Arc<Orchestrator>,
    ingress_router: Arc<IngressRouter>,
    dialer: Arc<OriginDialer>,
    flow_table: Arc<FlowTable>,
    observer: Arc<Observer>,
    first_connected: std::sync::Mutex<Option<oneshot::Sender<()>>>,
}

#[allow(clippy::too_many_arguments)]
impl ConnectionWorker {
    pub fn new(
        index: SlotIndex,
        config: WorkerConfig,
        identity: Arc<TunnelIdentity>,
        connector_id: ConnectorId,
        version: String,
        os_arch: String,
        features: Vec<String>,
        tags: Vec<Tag>,
        address_book: Arc<AddressBook>,
        protocol_selector: Arc<ProtocolSelector>,
        mux_factory: Arc<dyn TransportFactory>,
        quic_factory: Arc<dyn TransportFactory>,
        orchestrator: Arc<Orchestrator>,
        ingress_router: Arc<IngressRouter>,
        dialer: Arc<OriginDialer>,
        flow_table: Arc<FlowTable>,
        observer: Arc<Observer>,
        first_connected: oneshot::Sender<()>,
    ) -> Self {
        Self {
            index,
            config,
            identity,
            connector_id,
            version,
            os_arch,
            features,
            tags,
            address_book,
            protocol_selector,
            mux_factory,
            quic_factory,
            orchestrator,
            ingress_router,
            dialer,
            flow_table,
            observer,
            first_connected: std::sync::Mutex::new(Some(first_connected)),
        }
    }

    fn factory_for(&self, protocol: ProtocolChoice) -> &Arc<dyn TransportFactory> {
        match protocol {
            ProtocolChoice::FramedMux => &self.mux_factory,
            ProtocolChoice::Quic => &self.quic_factory,
        }
    }

    /// Runs the worker until `ctx` is cancelled or a `Drain` command or a
    /// slot-fatal failure ends it. Returns the first fatal error, if any,
    /// for the Supervisor to aggregate (`spec.md` §4.I).
    pub async fn run(
        self: Arc<Self>,
        ctx: ExecutionContext,
        mut commands: mpsc::Receiver<WorkerCommand>,
    ) -> Option<CoreError> {
        let policy = BackoffPolicy::new(self.config.backoff_initial, self.config.backoff_max);
        let mut backoff = BackoffState::default();
        let mut reconnect_token: Option<Vec<u8>> = None;
        let mut first_connected_notified = false;

        loop {
            if ctx.is_cancelled() {
                return None;
            }

            let (transport, address) = match self.dial_once(&ctx).await {
                Ok(dialed) => dialed,
                Err(_err) => {
                    if !self.wait_backoff(&ctx, &policy, &mut backoff, &mut commands).await {
                        return None;
                    }
                    continue;
                }
            };

            let register_result = self
                .register_once(&ctx, transport.as_ref(), reconnect_token.take())
                .await;
            let reply = match register_result {
                Ok(reply) => reply,
                Err(err) if err.code() == codes::AUTH_REJECTED => {
                    // `spec.md` §4.H: auth-rejected stops the slot permanently.
                    self.observer.disconnected(self.index, codes::AUTH_REJECTED);
                    return Some(err);
                }
                Err(err) => {
                    if err.code() == codes::PROTOCOL_INCOMPATIBLE {
                        let _ = self.protocol_selector.record_failure();
                    }
                    self.address_book
                        .record_dial_failure(&address, self.config.max_edge_addr_retries);
                    if !self.wait_backoff(&ctx, &policy, &mut backoff, &mut commands).await {
                        return None;
                    }
                    continue;
                }
            };
            reconnect_token = Some(reply.reconnect_token);
            self.address_book.record_dial_success(&address);
            self.protocol_selector.record_success();
            backoff.record_success();

            if !first_connected_notified {
                first_connected_notified = true;
                if let Some(tx) = self.first_connected.lock().unwrap().take() {
                    let _ = tx.send(());
                }
            }
            self.observer.connected(self.index);

            if let Some(datagram_rx) = transport.take_datagram_receiver() {
                self.spawn_datagram_pump(transport.clone(), datagram_rx);
            }

            match self.run_live(&ctx, &transport, &mut commands).await {
                LiveExit::ShuttingDown => {
                    bootstrap::unregister(transport.as_ref(), &ctx, self.config.grace_period).await;
                    self.observer.disconnected(self.index, "shutdown");
                    return None;
                }
                LiveExit::DrainRequested => {
                    bootstrap::unregister(transport.as_ref(), &ctx, self.config.grace_period).await;
                    self.observer.disconnected(self.index, "drain-requested");
                    return None;
                }
                LiveExit::Closed(reason) => {
                    let fatal = reason.is_fatal_for_slot();
                    self.observer.disconnected(self.index, format!("{reason:?}"));
                    if fatal {
                        return Some(CoreError::new(
                            codes::AUTH_REJECTED,
                            ErrorKind::TransportFatalForSlot,
                            "connection closed with a slot-fatal reason",
                        ));
                    }
                    if !self.wait_backoff(&ctx, &policy, &mut backoff, &mut commands).await {
                        return None;
                    }
                }
            }
        }
    }

    async fn dial_once(&self, ctx: &ExecutionContext) -> Result<(BoxTransport, ferrule_core::net::EdgeAddress), CoreError> {
        let address = self.address_book.next()?;
        let protocol = self.protocol_selector.current();
        let factory = self.factory_for(protocol);
        let dial_ctx = ctx.with_timeout(self.config.dial_edge_timeout);

        let outcome = dial_ctx.run(factory.dial(&dial_ctx, &address)).await;
        match outcome {
            Some(Ok(transport)) => Ok((transport, address)),
            Some(Err(err)) => {
                self.address_book
                    .record_dial_failure(&address, self.config.max_edge_addr_retries);
                let _ = self.protocol_selector.record_failure();
                Err(err.into())
            }
            None => {
                self.address_book
                    .record_dial_failure(&address, self.config.max_edge_addr_retries);
                let _ = self.protocol_selector.record_failure();
                Err(CoreError::new(
                    codes::TIMEOUT_EXCEEDED,
                    ErrorKind::TransportTransient,
                    format!("dial did not complete within {:?}", self.config.dial_edge_timeout),
                ))
            }
        }
    }

    async fn register_once(
        &self,
        ctx: &ExecutionContext,
        transport: &dyn ferrule_transport::transport::Transport,
        reconnect_token: Option<Vec<u8>>,
    ) -> Result<ferrule_transport::transport::RegisterReply, CoreError> {
        let request = RegisterRequest {
            account_tag: self.identity.account_tag.clone(),
            features: self.features.clone(),
            reconnect_token,
            connector_id: self.connector_id.to_string(),
            version: self.version.clone(),
            os_arch: self.os_arch.clone(),
            tags: self.tags.clone(),
        };
        bootstrap::register(transport, ctx, self.config.rpc_timeout, request).await
    }

    async fn run_live(
        &self,
        ctx: &ExecutionContext,
        transport: &BoxTransport,
        commands: &mut mpsc::Receiver<WorkerCommand>,
    ) -> LiveExit {
        loop {
            tokio::select! {
                _ = ctx.cancellation().cancelled() => return LiveExit::ShuttingDown,
                reason = transport.closed() => return LiveExit::Closed(reason),
                cmd = commands.recv() => {
                    match cmd {
                        Some(WorkerCommand::Drain) | None => return LiveExit::DrainRequested,
                        Some(WorkerCommand::Reconnect(_)) => {
                            // Already live; a reconnect signal is meaningless here.
                        }
                    }
                }
                accepted = transport.accept(ctx) => {
                    if let Ok(stream) = accepted {
                        self.spawn_stream_handler(stream);
                    }
                    // A transient accept error surfaces again through
                    // `transport.closed()` on the next loop iteration.
                }
            }
        }
    }

    fn spawn_stream_handler(&self, stream: ferrule_transport::stream::BoxStream) {
        let ingress_router = self.ingress_router.clone();
        let orchestrator = self.orchestrator.clone();
        let dialer = self.dialer.clone();
        tokio::spawn(async move {
            let metadata = stream.metadata().clone();
            let identity = RequestIdentity::new(
                metadata.authority.clone().unwrap_or_default(),
                metadata.path.clone().unwrap_or_default(),
            );
            let ruleset = orchestrator.current();
            match ingress_router.route(&ruleset, &identity) {
                Ok((_idx, service)) => {
                    if let Err(err) =
                        dispatch::dispatch(&dialer, &service, metadata.jump_destination.as_deref(), stream).await
                    {
                        tracing::debug!(code = err.code(), "stream dispatch ended");
                    }
                }
                Err(err) => {
                    tracing::debug!(code = err.code(), "no ingress rule matched stream");
                }
            }
        });
    }

    /// Relays QUIC datagrams for warp-routed UDP/ICMP flows (`spec.md`
    /// §4.G, §4.H `live`: "dispatch to G for datagrams"). Each distinct
    /// flow-key gets one dialed origin socket, shared by two tasks: one
    /// forwarding edge-to-origin payloads, one pumping origin replies back
    /// through `transport.send_datagram`.
    fn spawn_datagram_pump(&self, transport: BoxTransport, mut datagram_rx: ferrule_transport::transport::DatagramReceiver) {
        let flow_table = self.flow_table.clone();
        let dialer = self.dialer.clone();
        tokio::spawn(async move {
            let mut origins: HashMap<FlowId, mpsc::Sender<Bytes>> = HashMap::new();
            while let Some(datagram) = datagram_rx.recv().await {
                let Some(key) = crate::datagram::decode_flow_key(&datagram) else {
                    tracing::debug!("dropping malformed inbound datagram envelope");
                    continue;
                };
                let Some(payload) = crate::datagram::strip_envelope(&datagram) else {
                    continue;
                };
                // `upstream_stream_id` has no meaning for a datagram flow
                // carried over QUIC; 0 is a sentinel, never a real stream id
                // (`spec.md` §3 `Stream`: ids are assigned starting at 1).
                let flow_id = match flow_table.touch(key, 0) {
                    Ok(id) => id,
                    Err(err) => {
                        tracing::debug!(code = err.code(), "dropping datagram: no free flow slot");
                        continue;
                    }
                };

                let sender = match origins.get(&flow_id) {
                    Some(tx) => tx.clone(),
                    None => {
                        match Self::spawn_origin_pump(dialer.clone(), transport.clone(), flow_table.clone(), key, flow_id).await {
                            Some(tx) => {
                                origins.insert(flow_id, tx.clone());
                                tx
                            }
                            None => continue,
                        }
                    }
                };
                let _ = sender.send(payload).await;
            }
        });
    }

    /// Dials the origin side of one datagram flow and spawns its two pump
    /// tasks, returning the sender used to forward edge-to-origin payloads.
    async fn spawn_origin_pump(
        dialer: Arc<OriginDialer>,
        transport: BoxTransport,
        flow_table: Arc<FlowTable>,
        key: FlowKey,
        flow_id: FlowId,
    ) -> Option<mpsc::Sender<Bytes>> {
        let socket = match dialer.dial_datagram(&key).await {
            Ok(socket) => Arc::new(socket),
            Err(err) => {
                tracing::debug!(code = err.code(), "dropping datagram flow: origin dial failed");
                return None;
            }
        };

        let (tx, mut rx) = mpsc::channel::<Bytes>(32);

        let write_socket: Arc<DatagramSocket> = socket.clone();
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                if write_socket.send(&payload).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            loop {
                let reply = match socket.recv().await {
                    Ok(reply) => reply,
                    Err(_) => break,
                };
                let Some(current_key) = flow_table.lookup(flow_id) else {
                    break;
                };
                if let Some(upstream_stream_id) = flow_table.upstream_stream_id(&current_key) {
                    tracing::trace!(upstream_stream_id, "relaying datagram reply to edge");
                }
                let Some(envelope) = crate::datagram::encode_flow_key(&current_key, &reply) else {
                    continue;
                };
                if transport.send_datagram(envelope).await.is_err() {
                    break;
                }
            }
        });

        Some(tx)
    }

    async fn wait_backoff(
        &self,
        ctx: &ExecutionContext,
        policy: &BackoffPolicy,
        backoff: &mut BackoffState,
        commands: &mut mpsc::Receiver<WorkerCommand>,
    ) -> bool {
        let delay = backoff.next_delay(policy);
        backoff.record_failure();
        self.observer.reconnecting(self.index);

        tokio::select! {
            _ = ctx.cancellation().cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
            cmd = commands.recv() => match cmd {
                Some(WorkerCommand::Reconnect(explicit_delay)) => {
                    if let Some(extra) = explicit_delay {
                        tokio::time::sleep(extra).await;
                    }
                    true
                }
                Some(WorkerCommand::Drain) | None => false,
            },
        }
    }
}
