//! Routing-metadata preamble written at the start of every QUIC bidirectional
//! stream (`spec.md` §4.C, §4.E): a 4-byte big-endian length prefix followed
//! by a JSON-encoded [`StreamMetadata`]. Framed-mux carries the same
//! metadata in a HEADERS frame, optionally dictionary-compressed; QUIC has
//! no connection-wide frame layer to carry it on, so each stream announces
//! its own metadata as plain JSON before any application bytes.

use ferrule_transport::error::TransportError;
use ferrule_transport::stream::StreamMetadata;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Caps a malicious or corrupt peer from forcing an unbounded allocation.
const MAX_PREAMBLE_LEN: u32 = 64 * 1024;

pub async fn write_preamble<W: AsyncWrite + Unpin>(mut send: W, metadata: &StreamMetadata) -> Result<(), TransportError> {
    let bytes = serde_json::to_vec(metadata)
        .map_err(|e| TransportError::MalformedFrame { detail: e.to_string() })?;
    send.write_all(&(bytes.len() as u32).to_be_bytes())
        .await
        .map_err(|e| TransportError::Io { detail: e.to_string() })?;
    send.write_all(&bytes)
        .await
        .map_err(|e| TransportError::Io { detail: e.to_string() })
}

pub async fn read_preamble<R: AsyncRead + Unpin>(mut recv: R) -> Result<StreamMetadata, TransportError> {
    let mut len_buf = [0u8; 4];
    recv.read_exact(&mut len_buf)
        .await
        .map_err(|e| TransportError::Io { detail: e.to_string() })?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_PREAMBLE_LEN {
        return Err(TransportError::MalformedFrame {
            detail: format!("stream preamble of {len} bytes exceeds the {MAX_PREAMBLE_LEN}-byte cap"),
        });
    }

    let mut buf = vec![0u8; len as usize];
    recv.read_exact(&mut buf)
        .await
        .map_err(|e| TransportError::Io { detail: e.to_string() })?;
    serde_json::from_slice(&buf).map_err(|e| TransportError::MalformedFrame { detail: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn sample() -> StreamMetadata {
        StreamMetadata {
            authority: Some("svc.internal".to_string()),
            path: Some("/widgets".to_string()),
            jump_destination: None,
            headers: Default::default(),
        }
    }

    #[tokio::test]
    async fn round_trips_through_a_duplex_pipe() {
        let (client, server) = duplex(4096);
        let (client_read, mut client_write) = tokio::io::split(client);
        let (server_read, _server_write) = tokio::io::split(server);
        drop(client_read);

        let metadata = sample();
        write_preamble(&mut client_write, &metadata).await.unwrap();
        let decoded = read_preamble(server_read).await.unwrap();
        assert_eq!(decoded.authority, metadata.authority);
        assert_eq!(decoded.path, metadata.path);
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (client, server) = duplex(4096);
        let (_client_read, mut client_write) = tokio::io::split(client);
        let (server_read, _server_write) = tokio::io::split(server);

        client_write
            .write_all(&(MAX_PREAMBLE_LEN + 1).to_be_bytes())
            .await
            .unwrap();
        let err = read_preamble(server_read).await.unwrap_err();
        assert!(matches!(err, TransportError::MalformedFrame { .. }));
    }
}
