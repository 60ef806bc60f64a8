//! [`MuxConnection`]: the `Transport` implementation for framed-mux
//! (`spec.md` §4.C). One reader task demultiplexes inbound frames into
//! per-stream channels and a DashMap-backed stream table; one writer task
//! serializes outbound frames from every stream plus connection control
//! messages onto the TLS socket. Registration rides a reserved
//! control "stream" (id 0) as a JSON control message rather than a real
//! logical stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use ferrule_core::context::ExecutionContext;
use ferrule_core::ids::{ConnectionId, StreamId};
use ferrule_core::SystemClock;
use ferrule_transport::connection::{CloseReason, ConnectionState};
use ferrule_transport::error::TransportError;
use ferrule_transport::flow_window::FlowWindow;
use ferrule_transport::heartbeat::HeartbeatMonitor;
use ferrule_transport::stream::{BoxStream, StreamDirection, StreamMetadata};
use ferrule_transport::transport::{DatagramReceiver, RegisterReply, RegisterRequest, Transport};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::config::MuxConfig;
use crate::frame::{Frame, FrameCodec, FrameType, CONTROL_STREAM_ID};
use crate::header_codec;
use crate::stream::{MuxStream, StreamEvent};

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

struct StreamEntry {
    events: mpsc::Sender<StreamEvent>,
    send_window: Arc<FlowWindow>,
}

pub struct MuxConnection {
    id: ConnectionId,
    state: Mutex<ConnectionState>,
    streams: DashMap<StreamId, StreamEntry>,
    accept_rx: AsyncMutex<mpsc::Receiver<BoxStream>>,
    accept_tx: mpsc::Sender<BoxStream>,
    to_writer: mpsc::UnboundedSender<Frame>,
    connection_window: Arc<FlowWindow>,
    config: MuxConfig,
    next_client_stream_id: AtomicU64,
    register_reply: Mutex<Option<oneshot::Sender<ControlMessage>>>,
    closed_tx: watch::Sender<Option<CloseReason>>,
    closed_rx: watch::Receiver<Option<CloseReason>>,
    heartbeat: HeartbeatMonitor<SystemClock>,
    ctx: ExecutionContext,
    stream_closed_tx: mpsc::UnboundedSender<StreamId>,
}

impl MuxConnection {
    pub fn spawn<S>(id: ConnectionId, io: S, config: MuxConfig) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::spawn_with_context(id, io, config, ExecutionContext::root())
    }

    pub fn spawn_with_context<S>(
        id: ConnectionId,
        io: S,
        config: MuxConfig,
        ctx: ExecutionContext,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let framed_read = FramedRead::new(read_half, FrameCodec);
        let framed_write = FramedWrite::new(write_half, FrameCodec);

        let (to_writer, from_streams) = mpsc::unbounded_channel();
        let (accept_tx, accept_rx) = mpsc::channel(64);
        let (closed_tx, closed_rx) = watch::channel(None);
        let (stream_closed_tx, stream_closed_rx) = mpsc::unbounded_channel();

        let connection = Arc::new(Self {
            id,
            state: Mutex::new(ConnectionState::Registering),
            streams: DashMap::new(),
            accept_rx: AsyncMutex::new(accept_rx),
            accept_tx,
            to_writer,
            connection_window: Arc::new(FlowWindow::new(config.connection_window)),
            next_client_stream_id: AtomicU64::new(1),
            register_reply: Mutex::new(None),
            closed_tx,
            closed_rx,
            heartbeat: HeartbeatMonitor::new(SystemClock, config.heartbeat_interval, config.heartbeat_max_unacked),
            config,
            ctx: ctx.clone(),
            stream_closed_tx,
        });

        tokio::spawn(writer_task(from_streams, framed_write));
        tokio::spawn(reader_task(connection.clone(), framed_read));
        tokio::spawn(heartbeat_task(connection.clone()));
        tokio::spawn(stream_cleanup_task(connection.clone(), stream_closed_rx));

        connection
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    fn mark_closed(&self, reason: CloseReason) {
        tracing::debug!(connection = ?self.id, reason = ?reason, "mux connection closed");
        self.set_state(ConnectionState::Closed);
        let _ = self.closed_tx.send(Some(reason));
    }

    fn send_control(&self, msg: &ControlMessage, end_stream: bool) -> Result<(), TransportError> {
        let bytes = serde_json::to_vec(msg)
            .map_err(|e| TransportError::MalformedFrame { detail: e.to_string() })?;
        let frame = Frame::data(CONTROL_STREAM_ID, Bytes::from(bytes), end_stream);
        self.to_writer
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }

    fn insert_inbound_stream(&self, stream_id: StreamId, metadata: StreamMetadata) -> BoxStream {
        let (events_tx, events_rx) = mpsc::channel(32);
        let send_window = Arc::new(FlowWindow::new(self.config.stream_window));
        self.streams.insert(
            stream_id,
            StreamEntry {
                events: events_tx,
                send_window: send_window.clone(),
            },
        );
        Box::new(MuxStream::new(
            stream_id,
            self.id,
            StreamDirection::Inbound,
            metadata,
            events_rx,
            self.to_writer.clone(),
            send_window,
            self.connection_window.clone(),
            self.ctx.child(),
            self.stream_closed_tx.clone(),
        ))
    }
}

#[async_trait]
impl Transport for MuxConnection {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    async fn register(
        &self,
        ctx: &ExecutionContext,
        request: RegisterRequest,
    ) -> Result<RegisterReply, TransportError> {
        let (tx, rx) = oneshot::channel();
        *self.register_reply.lock().unwrap() = Some(tx);

        let msg = ControlMessage::Register {
            account_tag: request.account_tag,
            features: request.features,
            reconnect_token: request.reconnect_token,
            connector_id: request.connector_id,
            version: request.version,
            os_arch: request.os_arch,
            tags: request.tags.iter().map(|t| t.to_string()).collect(),
        };
        self.send_control(&msg, false)?;

        let register_ctx = ctx.with_timeout(self.config.register_timeout);
        let reply = register_ctx
            .run(rx)
            .await
            .ok_or(TransportError::RegisterTimeout)?
            .map_err(|_| TransportError::Closed)?;

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

    async fn open_stream(&self, _ctx: &ExecutionContext) -> Result<BoxStream, TransportError> {
        if self.state() != ConnectionState::Live {
            return Err(TransportError::Closed);
        }
        let raw_id = self.next_client_stream_id.fetch_add(2, Ordering::AcqRel);
        let stream_id = StreamId(raw_id);

        let (events_tx, events_rx) = mpsc::channel(32);
        let send_window = Arc::new(FlowWindow::new(self.config.stream_window));
        self.streams.insert(
            stream_id,
            StreamEntry {
                events: events_tx,
                send_window: send_window.clone(),
            },
        );

        let metadata = StreamMetadata::default();
        let payload = header_codec::encode(&metadata, self.config.header_quality);
        let frame = Frame::headers(raw_id as u32, Bytes::from(payload));
        self.to_writer
            .send(frame)
            .map_err(|_| TransportError::Closed)?;

        Ok(Box::new(MuxStream::new(
            stream_id,
            self.id,
            StreamDirection::Outbound,
            metadata,
            events_rx,
            self.to_writer.clone(),
            send_window,
            self.connection_window.clone(),
            self.ctx.child(),
            self.stream_closed_tx.clone(),
        )))
    }

    async fn accept(&self, ctx: &ExecutionContext) -> Result<BoxStream, TransportError> {
        let mut guard = self.accept_rx.lock().await;
        ctx.run(guard.recv())
            .await
            .flatten()
            .ok_or(TransportError::Closed)
    }

    async fn send_datagram(&self, _bytes: Bytes) -> Result<(), TransportError> {
        Err(TransportError::DatagramsUnsupported)
    }

    fn take_datagram_receiver(&self) -> Option<DatagramReceiver> {
        None
    }

    async fn close(&self, _ctx: &ExecutionContext, reason: CloseReason, grace_period: Duration) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        self.set_state(ConnectionState::Draining);
        let _ = self.to_writer.send(Frame::go_away(0, 0, "local-shutdown"));
        tokio::time::sleep(grace_period).await;
        self.mark_closed(reason);
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

async fn writer_task<W>(
    mut from_streams: mpsc::UnboundedReceiver<Frame>,
    mut sink: FramedWrite<W, FrameCodec>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = from_streams.recv().await {
        if sink.send(frame).await.is_err() {
            break;
        }
    }
}

/// Drains stream-closed notifications, removing the stream-table entry and
/// returning its unused send-window credit to the connection pool
/// (`spec.md` §4.C: "when both sides are half-closed the stream is
/// destroyed and its window is returned to the connection-level pool").
/// This is the only place `streams` entries are removed, whether the stream
/// closed normally or was reset.
async fn stream_cleanup_task(connection: Arc<MuxConnection>, mut closed_rx: mpsc::UnboundedReceiver<StreamId>) {
    while let Some(stream_id) = closed_rx.recv().await {
        if let Some((_, entry)) = connection.streams.remove(&stream_id) {
            let unused = entry.send_window.available().max(0) as u32;
            connection.connection_window.give_back(unused);
        }
        if connection.state() == ConnectionState::Draining && connection.streams.is_empty() {
            connection.mark_closed(CloseReason::RemoteGoAway);
        }
    }
}

/// Force-closes a draining connection once the GOAWAY grace period elapses,
/// even if streams are still open. A connection that drains naturally
/// before then is closed by `stream_cleanup_task` instead.
async fn goaway_grace_timer(connection: Arc<MuxConnection>, grace_period: Duration) {
    tokio::time::sleep(grace_period).await;
    if connection.state() == ConnectionState::Draining {
        connection.mark_closed(CloseReason::RemoteGoAway);
    }
}

async fn heartbeat_task(connection: Arc<MuxConnection>) {
    let mut ticker = tokio::time::interval(connection.config.heartbeat_interval);
    loop {
        ticker.tick().await;
        if connection.state() == ConnectionState::Closed {
            return;
        }
        if connection.heartbeat.is_timed_out() {
            connection.mark_closed(CloseReason::HeartbeatTimeout);
            return;
        }
        if connection.heartbeat.should_ping() {
            let _ = connection.to_writer.send(Frame::ping(false, 0));
        }
    }
}

async fn reader_task<R>(connection: Arc<MuxConnection>, mut source: FramedRead<R, FrameCodec>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = match source.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                connection.mark_closed(CloseReason::MalformedFrame(e.to_string()));
                return;
            }
            None => {
                connection.mark_closed(CloseReason::Io("connection closed by peer".to_string()));
                return;
            }
        };

        connection.heartbeat.record_received();

        match frame.frame_type {
            FrameType::Data if frame.stream_id == CONTROL_STREAM_ID => {
                match serde_json::from_slice::<ControlMessage>(&frame.payload) {
                    Ok(msg @ ControlMessage::RegisterReply { .. }) => {
                        if let Some(tx) = connection.register_reply.lock().unwrap().take() {
                            let _ = tx.send(msg);
                        }
                    }
                    _ => {}
                }
            }
            FrameType::Data => {
                let stream_id = StreamId(frame.stream_id as u64);
                if let Some(entry) = connection.streams.get(&stream_id) {
                    if !frame.payload.is_empty() {
                        let _ = entry.events.try_send(StreamEvent::Data(frame.payload.clone()));
                    }
                    if frame.is_end_stream() {
                        let _ = entry.events.try_send(StreamEvent::EndStream);
                    }
                    // WINDOW_UPDATE is credited by `MuxStream` itself once
                    // the application actually drains these bytes out of
                    // `poll_read`, not here on enqueue.
                }
            }
            FrameType::Headers => {
                let stream_id = StreamId(frame.stream_id as u64);
                if connection.streams.contains_key(&stream_id) {
                    continue;
                }
                let quality = connection.config.header_quality;
                match header_codec::decode(&frame.payload, quality) {
                    Ok(metadata) => {
                        let boxed = connection.insert_inbound_stream(stream_id, metadata);
                        let _ = connection.accept_tx.try_send(boxed);
                    }
                    Err(_) => {
                        let _ = connection
                            .to_writer
                            .send(Frame::rst_stream(frame.stream_id, 1));
                    }
                }
            }
            FrameType::WindowUpdate => {
                if let Some(delta) = frame.window_update_delta() {
                    if frame.stream_id == CONTROL_STREAM_ID {
                        if connection.connection_window.replenish(delta).is_err() {
                            connection.mark_closed(CloseReason::FlowControlViolation);
                            return;
                        }
                    } else {
                        let stream_id = StreamId(frame.stream_id as u64);
                        if let Some(entry) = connection.streams.get(&stream_id) {
                            if entry.send_window.replenish(delta).is_err() {
                                let _ = connection
                                    .to_writer
                                    .send(Frame::rst_stream(frame.stream_id, 2));
                            }
                        }
                    }
                }
            }
            FrameType::Ping => {
                if frame.flags & crate::frame::FLAG_ACK == 0 {
                    let _ = connection
                        .to_writer
                        .send(Frame::ping(true, frame.stream_id as u64));
                }
            }
            FrameType::GoAway => {
                connection.set_state(ConnectionState::Draining);
                if connection.streams.is_empty() {
                    connection.mark_closed(CloseReason::RemoteGoAway);
                    return;
                }
                // Let streams already open finish naturally; force-close
                // once the grace period elapses regardless of how many are
                // still open (mirrors the local `close()` path).
                tokio::spawn(goaway_grace_timer(connection.clone(), connection.config.close_grace_period));
            }
            FrameType::RstStream => {
                let stream_id = StreamId(frame.stream_id as u64);
                if let Some(entry) = connection.streams.get(&stream_id) {
                    let code = frame
                        .payload
                        .get(0..4)
                        .map(|b| u32::from_be_bytes(b.try_into().unwrap()))
                        .unwrap_or(0);
                    let _ = entry.events.try_send(StreamEvent::Reset(code));
                }
                let _ = connection.stream_closed_tx.send(stream_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn sample_request() -> RegisterRequest {
        RegisterRequest {
            account_tag: "acct".into(),
            features: vec![],
            reconnect_token: None,
            connector_id: "connector-1".into(),
            version: "0.1.0".into(),
            os_arch: "linux-x86_64".into(),
            tags: vec![],
        }
    }

    /// Drives the peer side of a duplex pipe as a minimal stand-in for the
    /// edge: read one control frame, assert it is a `Register`, write back
    /// the given reply.
    async fn respond_to_registration(
        io: tokio::io::DuplexStream,
        reply: ControlMessage,
    ) {
        let (read_half, write_half) = tokio::io::split(io);
        let mut reader = FramedRead::new(read_half, FrameCodec);
        let mut writer = FramedWrite::new(write_half, FrameCodec);
        let frame = reader.next().await.expect("frame").expect("decoded");
        assert_eq!(frame.stream_id, CONTROL_STREAM_ID);
        let msg: ControlMessage = serde_json::from_slice(&frame.payload).unwrap();
        assert!(matches!(msg, ControlMessage::Register { .. }));
        let bytes = serde_json::to_vec(&reply).unwrap();
        writer
            .send(Frame::data(CONTROL_STREAM_ID, Bytes::from(bytes), false))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn register_succeeds_on_ok_reply() {
        let (client_io, server_io) = duplex(64 * 1024);
        let config = MuxConfig::new("edge.example.internal");
        let client = MuxConnection::spawn(ConnectionId(1), client_io, config);

        let reply = ControlMessage::RegisterReply {
            status: RegisterStatus::Ok,
            reconnect_token: vec![1, 2, 3],
            reconnect_token_ttl_secs: 3600,
            server_info: "test-edge".into(),
            negotiated_features: vec!["gzip".into()],
            reason: None,
        };
        tokio::spawn(respond_to_registration(server_io, reply));

        let ctx = ExecutionContext::root();
        let outcome = client.register(&ctx, sample_request()).await.unwrap();
        assert_eq!(outcome.reconnect_token, vec![1, 2, 3]);
        assert_eq!(outcome.server_info, "test-edge");
        assert_eq!(client.state(), ConnectionState::Live);
    }

    #[tokio::test]
    async fn register_surfaces_auth_rejected() {
        let (client_io, server_io) = duplex(64 * 1024);
        let config = MuxConfig::new("edge.example.internal");
        let client = MuxConnection::spawn(ConnectionId(1), client_io, config);

        let reply = ControlMessage::RegisterReply {
            status: RegisterStatus::AuthRejected,
            reconnect_token: vec![],
            reconnect_token_ttl_secs: 0,
            server_info: String::new(),
            negotiated_features: vec![],
            reason: Some("bad credentials".into()),
        };
        tokio::spawn(respond_to_registration(server_io, reply));

        let ctx = ExecutionContext::root();
        let err = client.register(&ctx, sample_request()).await.unwrap_err();
        assert!(matches!(err, TransportError::AuthRejected { .. }));
    }

    #[tokio::test]
    async fn register_times_out_without_a_reply() {
        let (client_io, _server_io) = duplex(64 * 1024);
        let mut config = MuxConfig::new("edge.example.internal");
        config.register_timeout = Duration::from_millis(20);
        let client = MuxConnection::spawn(ConnectionId(1), client_io, config);

        let ctx = ExecutionContext::root();
        let err = client.register(&ctx, sample_request()).await.unwrap_err();
        assert!(matches!(err, TransportError::RegisterTimeout));
    }

    #[tokio::test]
    async fn open_stream_is_observed_as_headers_by_peer() {
        let (client_io, server_io) = duplex(64 * 1024);
        let config = MuxConfig::new("edge.example.internal");
        let client = MuxConnection::spawn(ConnectionId(1), client_io, config.clone());
        client.set_state(ConnectionState::Live);

        let (read_half, _write_half) = tokio::io::split(server_io);
        let mut reader = FramedRead::new(read_half, FrameCodec);

        let ctx = ExecutionContext::root();
        let _stream = client.open_stream(&ctx).await.unwrap();

        let frame = reader.next().await.unwrap().unwrap();
        assert_eq!(frame.frame_type, FrameType::Headers);
        assert!(StreamId(frame.stream_id as u64).is_client_initiated());
    }
}
