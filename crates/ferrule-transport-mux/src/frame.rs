//! Framed-mux wire frames (`spec.md` §4.C). The byte layout here is an
//! implementation detail — the spec only constrains the semantics (frame
//! types, stream-id parity, flow-control rules) that interop with the edge
//! must preserve; this codec is internal to this connector.
//!
//! Layout: `[type:u8][flags:u8][stream_id:u32 BE][length:u32 BE][payload]`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub const FLAG_END_STREAM: u8 = 0x1;
pub const FLAG_ACK: u8 = 0x1;

/// Reserved stream id carrying connection-level control messages
/// (registration, connection-wide WINDOW_UPDATE) rather than a real
/// logical stream.
pub const CONTROL_STREAM_ID: u32 = 0;

/// Frames larger than this are rejected as malformed rather than letting a
/// corrupt length field cause an unbounded allocation.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameType {
    Data,
    Headers,
    WindowUpdate,
    Ping,
    GoAway,
    RstStream,
}

impl FrameType {
    fn to_byte(self) -> u8 {
        match self {
            FrameType::Data => 0,
            FrameType::Headers => 1,
            FrameType::WindowUpdate => 2,
            FrameType::Ping => 3,
            FrameType::GoAway => 4,
            FrameType::RstStream => 5,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(FrameType::Data),
            1 => Some(FrameType::Headers),
            2 => Some(FrameType::WindowUpdate),
            3 => Some(FrameType::Ping),
            4 => Some(FrameType::GoAway),
            5 => Some(FrameType::RstStream),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Frame {
    pub stream_id: u32,
    pub frame_type: FrameType,
    pub flags: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn data(stream_id: u32, payload: Bytes, end_stream: bool) -> Self {
        Self {
            stream_id,
            frame_type: FrameType::Data,
            flags: if end_stream { FLAG_END_STREAM } else { 0 },
            payload,
        }
    }

    pub fn headers(stream_id: u32, payload: Bytes) -> Self {
        Self {
            stream_id,
            frame_type: FrameType::Headers,
            flags: 0,
            payload,
        }
    }

    pub fn window_update(stream_id: u32, delta: u32) -> Self {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32(delta);
        Self {
            stream_id,
            frame_type: FrameType::WindowUpdate,
            flags: 0,
            payload: buf.freeze(),
        }
    }

    pub fn ping(ack: bool, opaque: u64) -> Self {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u64(opaque);
        Self {
            stream_id: 0,
            frame_type: FrameType::Ping,
            flags: if ack { FLAG_ACK } else { 0 },
            payload: buf.freeze(),
        }
    }

    pub fn go_away(last_stream_id: u32, code: u32, reason: &str) -> Self {
        let mut buf = BytesMut::with_capacity(8 + reason.len());
        buf.put_u32(last_stream_id);
        buf.put_u32(code);
        buf.put_slice(reason.as_bytes());
        Self {
            stream_id: 0,
            frame_type: FrameType::GoAway,
            flags: 0,
            payload: buf.freeze(),
        }
    }

    pub fn rst_stream(stream_id: u32, code: u32) -> Self {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32(code);
        Self {
            stream_id,
            frame_type: FrameType::RstStream,
            flags: 0,
            payload: buf.freeze(),
        }
    }

    pub fn window_update_delta(&self) -> Option<u32> {
        (self.frame_type == FrameType::WindowUpdate && self.payload.len() >= 4)
            .then(|| u32::from_be_bytes(self.payload[0..4].try_into().unwrap()))
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags & FLAG_END_STREAM != 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameCodecError {
    #[error("frame length {0} exceeds maximum {MAX_FRAME_LEN}")]
    TooLarge(u32),
    #[error("unknown frame type byte {0}")]
    UnknownType(u8),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

const HEADER_LEN: usize = 10;

#[derive(Default)]
pub struct FrameCodec;

impl Encoder<Frame> for FrameCodec {
    type Error = FrameCodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.payload.len() as u32;
        if len > MAX_FRAME_LEN {
            return Err(FrameCodecError::TooLarge(len));
        }
        dst.reserve(HEADER_LEN + item.payload.len());
        dst.put_u8(item.frame_type.to_byte());
        dst.put_u8(item.flags);
        dst.put_u32(item.stream_id);
        dst.put_u32(len);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let frame_type_byte = src[0];
        let flags = src[1];
        let stream_id = u32::from_be_bytes(src[2..6].try_into().unwrap());
        let len = u32::from_be_bytes(src[6..10].try_into().unwrap());
        if len > MAX_FRAME_LEN {
            return Err(FrameCodecError::TooLarge(len));
        }
        if src.len() < HEADER_LEN + len as usize {
            src.reserve(HEADER_LEN + len as usize - src.len());
            return Ok(None);
        }
        let frame_type = FrameType::from_byte(frame_type_byte)
            .ok_or(FrameCodecError::UnknownType(frame_type_byte))?;
        src.advance(HEADER_LEN);
        let payload = src.split_to(len as usize).freeze();
        Ok(Some(Frame {
            stream_id,
            frame_type,
            flags,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frame_round_trips() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        let frame = Frame::data(7, Bytes::from_static(b"hello"), true);
        codec.encode(frame.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.stream_id, 7);
        assert_eq!(decoded.frame_type, FrameType::Data);
        assert!(decoded.is_end_stream());
        assert_eq!(&decoded.payload[..], b"hello");
    }

    #[test]
    fn partial_frame_returns_none() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        let frame = Frame::window_update(3, 1024);
        codec.encode(frame, &mut buf).unwrap();
        let mut truncated = buf.split_to(buf.len() - 1);
        assert!(codec.decode(&mut truncated).unwrap().is_none());
    }

    #[test]
    fn window_update_delta_round_trips() {
        let frame = Frame::window_update(1, 65536);
        assert_eq!(frame.window_update_delta(), Some(65536));
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.put_u8(FrameType::Data.to_byte());
        buf.put_u8(0);
        buf.put_u32(1);
        buf.put_u32(MAX_FRAME_LEN + 1);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameCodecError::TooLarge(_))
        ));
    }
}
