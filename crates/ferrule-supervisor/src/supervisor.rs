//! Supervisor (`spec.md` §4.I): owns `N` Connection Workers, relays
//! `ReconnectSignal`s to a randomly chosen worker, and coordinates
//! shutdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ferrule_core::context::ExecutionContext;
use ferrule_core::credentials::TunnelIdentity;
use ferrule_core::error::CoreError;
use ferrule_core::ids::{ConnectorId, SlotIndex};
use ferrule_core::tag::Tag;
use ferrule_dialer::OriginDialer;
use ferrule_flow::FlowTable;
use ferrule_observer::Observer;
use ferrule_pool::{AddressBook, ProtocolSelector};
use ferrule_router::{IngressRouter, Orchestrator};
use ferrule_transport::factory::TransportFactory;
use rand::Rng;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

use crate::config::SupervisorConfig;
use crate::worker::{ConnectionWorker, WorkerCommand};

/// The resources one Supervisor builds once and shares across every worker
/// it owns (`spec.md` §4.I: "constructs shared resources (Address Book,
/// Protocol Selector, Orchestrator, Observer, ICMP router)").
pub struct SharedResources {
    pub address_book: Arc<AddressBook>,
    pub protocol_selector: Arc<ProtocolSelector>,
    pub orchestrator: Arc<Orchestrator>,
    pub ingress_router: Arc<IngressRouter>,
    pub dialer: Arc<OriginDialer>,
    pub flow_table: Arc<FlowTable>,
    pub observer: Arc<Observer>,
    pub mux_factory: Arc<dyn TransportFactory>,
    pub quic_factory: Arc<dyn TransportFactory>,
}

pub struct Supervisor {
    handles: Vec<JoinHandle<Option<CoreError>>>,
    command_txs: Vec<mpsc::Sender<WorkerCommand>>,
    first_connected_rxs: Vec<oneshot::Receiver<()>>,
    first_fatal: Arc<Mutex<Option<CoreError>>>,
    fatal_notify: Arc<Notify>,
}

#[allow(clippy::too_many_arguments)]
impl Supervisor {
    /// Spawns `config.ha_connections` Connection Workers sharing `resources`,
    /// each derived from `ctx` via [`ExecutionContext::child`] so canceling
    /// `ctx` tears all of them down without affecting siblings.
    pub fn spawn(
        ctx: &ExecutionContext,
        config: SupervisorConfig,
        identity: Arc<TunnelIdentity>,
        connector_id: ConnectorId,
        version: String,
        os_arch: String,
        features: Vec<String>,
        tags: Vec<Tag>,
        resources: SharedResources,
    ) -> Self {
        let first_fatal = Arc::new(Mutex::new(None));
        let fatal_notify = Arc::new(Notify::new());
        let mut handles = Vec::with_capacity(config.ha_connections);
        let mut command_txs = Vec::with_capacity(config.ha_connections);
        let mut first_connected_rxs = Vec::with_capacity(config.ha_connections);

        for index in 0..config.ha_connections {
            let (command_tx, command_rx) = mpsc::channel(4);
            let (first_connected_tx, first_connected_rx) = oneshot::channel();

            let worker = Arc::new(ConnectionWorker::new(
                index as SlotIndex,
                config.worker.clone(),
                identity.clone(),
                connector_id,
                version.clone(),
                os_arch.clone(),
                features.clone(),
                tags.clone(),
                resources.address_book.clone(),
                resources.protocol_selector.clone(),
                resources.mux_factory.clone(),
                resources.quic_factory.clone(),
                resources.orchestrator.clone(),
                resources.ingress_router.clone(),
                resources.dialer.clone(),
                resources.flow_table.clone(),
                resources.observer.clone(),
                first_connected_tx,
            ));

            let worker_ctx = ctx.child();
            let first_fatal = first_fatal.clone();
            let fatal_notify = fatal_notify.clone();
            let handle = tokio::spawn(async move {
                let result = worker.run(worker_ctx, command_rx).await;
                if let Some(err) = &result {
                    let mut slot = first_fatal.lock().unwrap();
                    if slot.is_none() {
                        *slot = Some(CoreError::new(err.code(), err.kind(), err.message().to_string()));
                        fatal_notify.notify_waiters();
                    }
                }
                result
            });

            handles.push(handle);
            command_txs.push(command_tx);
            first_connected_rxs.push(first_connected_rx);
        }

        Self { handles, command_txs, first_connected_rxs, first_fatal, fatal_notify }
    }

    pub fn worker_count(&self) -> usize {
        self.command_txs.len()
    }

    /// Resolves once some worker has returned a fatal-for-process error, or
    /// immediately if one already has (`spec.md` §7: "the Supervisor
    /// collects the first fatal-for-process error and initiates
    /// shutdown"). Callers race this against external signals to decide
    /// when to stop waiting and start shutting down.
    pub async fn wait_for_fatal(&self) {
        let notified = self.fatal_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.first_fatal.lock().unwrap().is_some() {
            return;
        }
        notified.await;
    }

    /// Relays an externally-sourced `ReconnectSignal` to one randomly
    /// chosen worker (`spec.md` §4.I). No-op if there are no workers.
    pub fn relay_reconnect_signal(&self, explicit_delay: Option<Duration>) {
        if self.command_txs.is_empty() {
            return;
        }
        let index = rand::thread_rng().gen_range(0..self.command_txs.len());
        let _ = self.command_txs[index].try_send(WorkerCommand::Reconnect(explicit_delay));
    }

    /// Resolves once every worker has signaled its first-connected event,
    /// or immediately if there are no workers to wait on.
    pub async fn wait_all_first_connected(&mut self) {
        for rx in self.first_connected_rxs.drain(..) {
            let _ = rx.await;
        }
    }

    /// Signals every worker to drain, waits up to `grace_period` for each
    /// to finish, then forcibly aborts any that are still running
    /// (`spec.md` §4.I shutdown). Returns the aggregated first fatal
    /// error, if any (`spec.md` §4.I: "a single aggregated error").
    pub async fn shutdown(self, grace_period: Duration) -> Option<CoreError> {
        for tx in &self.command_txs {
            let _ = tx.send(WorkerCommand::Drain).await;
        }
        for mut handle in self.handles {
            match tokio::time::timeout(grace_period, &mut handle).await {
                Ok(_) => {}
                Err(_elapsed) => handle.abort(),
            }
        }
        self.first_fatal.lock().unwrap().take()
    }
}
