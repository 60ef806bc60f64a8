//! [`QuicConnection`]: the `Transport` implementation for QUIC. The first
//! bidirectional stream opened by the client is reserved for the
//! registration RPC (`spec.md` §4.C, §4.L); every other bi-stream maps 1:1
//! onto a [`ferrule_transport::stream::Stream`]. Datagrams are relayed into
//! a channel the caller can take exactly once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ferrule_core::context::ExecutionContext;
use ferrule_core::ids::{ConnectionId, StreamId};
use ferrule_transport::connection::{CloseReason, ConnectionState};
use ferrule_transport::error::TransportError;
use ferrule_transport::stream::{BoxStream, StreamDirection, StreamMetadata};
use ferrule_transport::transport::{DatagramReceiver, RegisterReply, RegisterRequest, Transport};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::config::QuicConfig;
use crate::header;
use crate::stream::QuicStream;

#[derive(Serialize, Deserialize)]
enum ControlMessage {
    Register {
        account_tag: String,
        features: Vec<String>,
        reconnect_token: Option<Vec<u8>>,
        connector_id: String,
        version: String,
        os_arch: String,
        tags: Vec<String>,
    },
    RegisterReply {
        status: RegisterStatus,
        reconnect_token: Vec<u8>,
        reconnect_token_ttl_secs: u64,
        server_info: String,
        negotiated_features: Vec<String>,
        reason: Option<String>,
    },
}

#[derive(Serialize, Deserialize)]
enum RegisterStatus {
    Ok,
    AuthRejected,
    ServerBusy,
    ProtocolIncompatible,
}

pub struct QuicConnection {
    id: ConnectionId,
    state: Mutex<ConnectionState>,
    connection: quinn::Connection,
    config: QuicConfig,
    next_stream_index: AtomicU64,
    datagram_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    closed_tx: watch::Sender<Option<CloseReason>>,
    closed_rx: watch::Receiver<Option<CloseReason>>,
}

impl QuicConnection {
    pub fn spawn(id: ConnectionId, connection: quinn::Connection, config: QuicConfig) -> std::sync::Arc<Self> {
        let (datagram_tx, datagram_rx) = mpsc::channel(256);
        let (closed_tx, closed_rx) = watch::channel(None);

        let this = std::sync::Arc::new(Self {
            id,
            state: Mutex::new(ConnectionState::Registering),
            connection,
            config,
            next_stream_index: AtomicU64::new(0),
            datagram_rx: Mutex::new(Some(datagram_rx)),
            closed_tx,
            closed_rx,
        });

        tokio::spawn(datagram_pump(this.connection.clone(), datagram_tx));
        tokio::spawn(close_watcher(this.clone()));

        this
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }
}

async fn datagram_pump(connection: quinn::Connection, tx: mpsc::Sender<Bytes>) {
    loop {
        match connection.read_datagram().await {
            Ok(bytes) => {
                if tx.send(bytes).await.is_err() {
                    return;
                }
            }
            Err(_) => return,
        }
    }
}

async fn close_watcher(connection: std::sync::Arc<QuicConnection>) {
    let cause = connection.connection.closed().await;
    tracing::debug!(connection = ?connection.id, cause = %cause, "quic connection closed");
    connection.set_state(ConnectionState::Closed);
    let reason = CloseReason::Io(cause.to_string());
    let _ = connection.closed_tx.send(Some(reason));
}

#[async_trait]
impl Transport for QuicConnection {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    async fn register(
        &self,
        ctx: &ExecutionContext,
        request: RegisterRequest,
    ) -> Result<RegisterReply, TransportError> {
        let register_ctx = ctx.with_timeout(self.config.register_timeout);
        let (mut send, mut recv) = register_ctx
            .run(self.connection.open_bi())
            .await
            .ok_or(TransportError::RegisterTimeout)?
            .map_err(|e| TransportError::Io { detail: e.to_string() })?;

        let msg = ControlMessage::Register {
            account_tag: request.account_tag,
            features: request.features,
            reconnect_token: request.reconnect_token,
            connector_id: request.connector_id,
            version: request.version,
            os_arch: request.os_arch,
            tags: request.tags.iter().map(|t| t.to_string()).collect(),
        };
        let bytes = serde_json::to_vec(&msg)
            .map_err(|e| TransportError::MalformedFrame { detail: e.to_string() })?;

        use tokio::io::AsyncWriteExt;
        register_ctx
            .run(send.write_all(&bytes))
            .await
            .ok_or(TransportError::RegisterTimeout)?
            .map_err(|e| TransportError::Io { detail: e.to_string() })?;
        send.finish()
            .map_err(|e| TransportError::Io { detail: e.to_string() })?;

        const MAX_REGISTER_REPLY: usize = 64 * 1024;
        let buf = register_ctx
            .run(recv.read_to_end(MAX_REGISTER_REPLY))
            .await
            .ok_or(TransportError::RegisterTimeout)?
            .map_err(|e| TransportError::Io { detail: e.to_string() })?;

        let reply: ControlMessage = serde_json::from_slice(&buf)
            .map_err(|e| TransportError::MalformedFrame { detail: e.to_string() })?;

        match reply {
            ControlMessage::RegisterReply {
                status,
                reconnect_token,
                reconnect_token_ttl_secs,
                server_info,
                negotiated_features,
                reason,
            } => match status {
                RegisterStatus::Ok => {
                    self.set_state(ConnectionState::Live);
                    tracing::info!(connection = ?self.id, server_info = %server_info, "registered with edge");
                    Ok(RegisterReply {
                        reconnect_token,
                        reconnect_token_ttl: Duration::from_secs(reconnect_token_ttl_secs),
                        server_info,
                        negotiated_features,
                    })
                }
                RegisterStatus::AuthRejected => Err(TransportError::AuthRejected {
                    reason: reason.unwrap_or_default(),
                }),
                RegisterStatus::ServerBusy => Err(TransportError::ServerBusy),
                RegisterStatus::ProtocolIncompatible => Err(TransportError::ProtocolIncompatible),
            },
            ControlMessage::Register { .. } => Err(TransportError::MalformedFrame {
                detail: "expected RegisterReply control message".to_string(),
            }),
        }
    }

    async fn open_stream(&self, ctx: &ExecutionContext) -> Result<BoxStream, TransportError> {
        if self.state() != ConnectionState::Live {
            return Err(TransportError::Closed);
        }
        let (mut send, recv) = ctx
            .run(self.connection.open_bi())
            .await
            .ok_or(TransportError::Closed)?
            .map_err(|e| TransportError::Io { detail: e.to_string() })?;
        // Outbound streams are rare (mostly control RPC) and carry no
        // ingress metadata of their own; the preamble still has to be
        // written so the accepting peer's `read_preamble` stays in sync.
        let metadata = StreamMetadata::default();
        header::write_preamble(&mut send, &metadata).await?;
        let index = self.next_stream_index.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(QuicStream::new(
            StreamId(index),
            self.id,
            StreamDirection::Outbound,
            metadata,
            send,
            recv,
        )))
    }

    async fn accept(&self, ctx: &ExecutionContext) -> Result<BoxStream, TransportError> {
        loop {
            let (mut send, mut recv) = ctx
                .run(self.connection.accept_bi())
                .await
                .ok_or(TransportError::Closed)?
                .map_err(|e| TransportError::Io { detail: e.to_string() })?;

            let metadata = match header::read_preamble(&mut recv).await {
                Ok(metadata) => metadata,
                Err(err) => {
                    tracing::debug!(connection = ?self.id, error = %err, "dropping quic stream with a malformed routing preamble");
                    let _ = send.reset(quinn::VarInt::from_u32(1));
                    let _ = recv.stop(quinn::VarInt::from_u32(1));
                    continue;
                }
            };

            let index = self.next_stream_index.fetch_add(1, Ordering::Relaxed);
            return Ok(Box::new(QuicStream::new(
                StreamId(index),
                self.id,
                StreamDirection::Inbound,
                metadata,
                send,
                recv,
            )));
        }
    }

    async fn send_datagram(&self, bytes: Bytes) -> Result<(), TransportError> {
        let cap = self.config.datagram_cap();
        if bytes.len() > cap {
            return Err(TransportError::FlowControlViolation {
                detail: format!("datagram of {} bytes exceeds cap of {cap}", bytes.len()),
            });
        }
        self.connection
            .send_datagram(bytes)
            .map_err(|e| TransportError::Io { detail: e.to_string() })
    }

    fn take_datagram_receiver(&self) -> Option<DatagramReceiver> {
        self.datagram_rx.lock().unwrap().take()
    }

    async fn close(&self, _ctx: &ExecutionContext, reason: CloseReason, grace_period: Duration) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        self.set_state(ConnectionState::Draining);
        tokio::time::sleep(grace_period).await;
        self.connection.close(quinn::VarInt::from_u32(0), b"local-shutdown");
        self.set_state(ConnectionState::Closed);
        let _ = self.closed_tx.send(Some(reason));
    }

    async fn closed(&self) -> CloseReason {
        let mut rx = self.closed_rx.clone();
        loop {
            if let Some(reason) = rx.borrow().clone() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return CloseReason::Io("connection dropped without a recorded reason".to_string());
            }
        }
    }
}
