//! [`QuicStream`]: one QUIC bidirectional stream, wrapped to implement
//! [`ferrule_transport::stream::Stream`]. Flow control is not reimplemented
//! here — `quinn`'s `SendStream`/`RecvStream` already apply the
//! connection/stream receive-window limits configured on the endpoint's
//! `TransportConfig` (`spec.md` §4.C QUIC defaults), so `poll_write`
//! naturally backpressures against them.

use std::cell::Cell;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use ferrule_core::ids::{ConnectionId, StreamId};
use ferrule_transport::stream::{Stream, StreamDirection, StreamMetadata, StreamState};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pub struct QuicStream {
    id: StreamId,
    connection_id: ConnectionId,
    direction: StreamDirection,
    metadata: StreamMetadata,
    state: Cell<StreamState>,
    send: quinn::SendStream,
    recv: quinn::RecvStream,
}

impl QuicStream {
    pub fn new(
        id: StreamId,
        connection_id: ConnectionId,
        direction: StreamDirection,
        metadata: StreamMetadata,
        send: quinn::SendStream,
        recv: quinn::RecvStream,
    ) -> Self {
        Self {
            id,
            connection_id,
            direction,
            metadata,
            state: Cell::new(StreamState::Open),
            send,
            recv,
        }
    }
}

impl Stream for QuicStream {
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

impl AsyncRead for QuicStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let result = Pin::new(&mut this.recv).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            if buf.filled().len() == before {
                this.state.set(this.state.get().close_remote());
            }
        }
        result
    }
}

impl AsyncWrite for QuicStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().send).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().send).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.send).poll_shutdown(cx);
        if result.is_ready() {
            this.state.set(this.state.get().close_local());
        }
        result
    }
}
