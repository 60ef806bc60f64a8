//! [`MuxStream`]: one logical stream multiplexed over a
//! [`crate::connection::MuxConnection`]. Flow control on the send side is
//! enforced here by consuming from both the stream- and connection-level
//! [`FlowWindow`] before a DATA frame leaves. On the receive side, credit is
//! only handed back to the peer once the application has actually drained
//! the bytes out of `poll_read` (`spec.md` §4.C, §5) — not when the frame
//! merely lands in this stream's channel — so a slow reader naturally
//! throttles the peer instead of silently dropping data it was told it
//! could keep sending.

use std::cell::Cell;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use ferrule_core::context::ExecutionContext;
use ferrule_core::ids::{ConnectionId, StreamId};
use ferrule_transport::flow_window::FlowWindow;
use ferrule_transport::stream::{Stream, StreamDirection, StreamMetadata, StreamState};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

use crate::frame::{Frame, CONTROL_STREAM_ID};

/// Maximum payload carried by a single DATA frame this stream emits. Larger
/// writes are chunked across several frames so one write doesn't hold the
/// whole connection window hostage.
const MAX_CHUNK: usize = 16 * 1024;

pub enum StreamEvent {
    Data(Bytes),
    EndStream,
    Reset(u32),
}

type WindowFuture = Pin<Box<dyn Future<Output = Option<()>> + Send>>;

struct PendingWrite {
    fut: WindowFuture,
    chunk: Bytes,
}

pub struct MuxStream {
    id: StreamId,
    connection_id: ConnectionId,
    direction: StreamDirection,
    metadata: StreamMetadata,
    state: Cell<StreamState>,
    recv_rx: mpsc::Receiver<StreamEvent>,
    recv_partial: Option<Bytes>,
    to_writer: mpsc::UnboundedSender<Frame>,
    stream_window: Arc<FlowWindow>,
    connection_window: Arc<FlowWindow>,
    ctx: ExecutionContext,
    pending_write: Option<PendingWrite>,
    eof_delivered: bool,
    closed_tx: mpsc::UnboundedSender<StreamId>,
    closed_notified: Cell<bool>,
}

impl MuxStream {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: StreamId,
        connection_id: ConnectionId,
        direction: StreamDirection,
        metadata: StreamMetadata,
        recv_rx: mpsc::Receiver<StreamEvent>,
        to_writer: mpsc::UnboundedSender<Frame>,
        stream_window: Arc<FlowWindow>,
        connection_window: Arc<FlowWindow>,
        ctx: ExecutionContext,
        closed_tx: mpsc::UnboundedSender<StreamId>,
    ) -> Self {
        Self {
            id,
            connection_id,
            direction,
            metadata,
            state: Cell::new(StreamState::Open),
            recv_rx,
            recv_partial: None,
            to_writer,
            stream_window,
            connection_window,
            ctx,
            pending_write: None,
            eof_delivered: false,
            closed_tx,
            closed_notified: Cell::new(false),
        }
    }

    /// Tells the owning connection this stream is fully closed so it can
    /// drop the stream-table entry and return unused send-window credit to
    /// the connection pool. Idempotent — both halves of a close can race to
    /// call this, only the first one does anything.
    fn notify_if_closed(&self) {
        if self.state.get().is_closed() && !self.closed_notified.replace(true) {
            let _ = self.closed_tx.send(self.id);
        }
    }
}

impl Stream for MuxStream {
    fn id(&self) -> StreamId {
        self.id
    }

    fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    fn direction(&self) -> StreamDirection {
        self.direction
    }

    fn state(&self) -> StreamState {
        self.state.get()
    }

    fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }
}

impl AsyncRead for MuxStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if let Some(partial) = this.recv_partial.take() {
            let take = partial.len().min(buf.remaining());
            buf.put_slice(&partial[..take]);
            if take < partial.len() {
                this.recv_partial = Some(partial.slice(take..));
            }
            this.credit_drained(take as u32);
            return Poll::Ready(Ok(()));
        }

        if this.eof_delivered {
            return Poll::Ready(Ok(()));
        }

        match this.recv_rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                this.eof_delivered = true;
                this.state.set(this.state.get().close_remote());
                this.notify_if_closed();
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Some(StreamEvent::EndStream)) => {
                this.eof_delivered = true;
                this.state.set(this.state.get().close_remote());
                this.notify_if_closed();
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Some(StreamEvent::Reset(code))) => {
                this.eof_delivered = true;
                this.state.set(StreamState::Closed);
                this.notify_if_closed();
                Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    format!("stream reset by peer, code {code}"),
                )))
            }
            Poll::Ready(Some(StreamEvent::Data(bytes))) => {
                let take = bytes.len().min(buf.remaining());
                buf.put_slice(&bytes[..take]);
                if take < bytes.len() {
                    this.recv_partial = Some(bytes.slice(take..));
                }
                this.credit_drained(take as u32);
                Poll::Ready(Ok(()))
            }
        }
    }
}

impl MuxStream {
    /// Hands WINDOW_UPDATE credit back to the peer for `n` bytes the
    /// application just drained out of `poll_read`. Both the per-stream and
    /// connection-level windows are credited, mirroring what the sender
    /// consumed from on the write side.
    fn credit_drained(&self, n: u32) {
        if n == 0 {
            return;
        }
        let _ = self.to_writer.send(Frame::window_update(self.id.0 as u32, n));
        let _ = self.to_writer.send(Frame::window_update(CONTROL_STREAM_ID, n));
    }
}

impl AsyncWrite for MuxStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.pending_write.is_none() {
            if buf.is_empty() {
                return Poll::Ready(Ok(0));
            }
            let n = buf.len().min(MAX_CHUNK);
            let chunk = Bytes::copy_from_slice(&buf[..n]);
            let stream_window = this.stream_window.clone();
            let connection_window = this.connection_window.clone();
            let ctx = this.ctx.clone();
            let len = n as u32;
            let fut: WindowFuture = Box::pin(async move {
                stream_window.consume(len, &ctx).await?;
                connection_window.consume(len, &ctx).await?;
                Some(())
            });
            this.pending_write = Some(PendingWrite { fut, chunk });
        }

        let pending = this.pending_write.as_mut().unwrap();
        match pending.fut.as_mut().poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                this.pending_write = None;
                Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "write cancelled or deadline exceeded",
                )))
            }
            Poll::Ready(Some(())) => {
                let PendingWrite { chunk, .. } = this.pending_write.take().unwrap();
                let n = chunk.len();
                let frame = Frame::data(this.id.0 as u32, chunk, false);
                this.to_writer.send(frame).map_err(|_| {
                    io::Error::new(io::ErrorKind::BrokenPipe, "mux connection writer is gone")
                })?;
                Poll::Ready(Ok(n))
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.state.get() == StreamState::Closed
            || this.state.get() == StreamState::HalfClosedLocal
        {
            return Poll::Ready(Ok(()));
        }
        let frame = Frame::data(this.id.0 as u32, Bytes::new(), true);
        this.to_writer
            .send(frame)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "mux connection writer is gone"))?;
        this.state.set(this.state.get().close_local());
        this.notify_if_closed();
        Poll::Ready(Ok(()))
    }
}
