//! [`MuxTransportFactory`]: dials a TCP connection to an [`EdgeAddress`]
//! and performs a TLS handshake with SNI set to the configured edge
//! hostname, then hands the encrypted stream to [`MuxConnection::spawn`]
//! (`spec.md` §6 "Encrypted transport to the edge").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ferrule_core::context::ExecutionContext;
use ferrule_core::ids::ConnectionId;
use ferrule_core::net::EdgeAddress;
use ferrule_core::protocol::ProtocolChoice;
use ferrule_transport::error::TransportError;
use ferrule_transport::factory::TransportFactory;
use ferrule_transport::transport::BoxTransport;
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::config::MuxConfig;
use crate::connection::MuxConnection;

pub struct MuxTransportFactory {
    tls_connector: TlsConnector,
    config: MuxConfig,
    next_connection_id: AtomicU64,
}

impl MuxTransportFactory {
    pub fn new(tls_config: rustls::ClientConfig, config: MuxConfig) -> Self {
        Self {
            tls_connector: TlsConnector::from(Arc::new(tls_config)),
            config,
            next_connection_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl TransportFactory for MuxTransportFactory {
    fn protocol(&self) -> ProtocolChoice {
        ProtocolChoice::FramedMux
    }

    async fn dial(
        &self,
        ctx: &ExecutionContext,
        address: &EdgeAddress,
    ) -> Result<BoxTransport, TransportError> {
        let server_name = ServerName::try_from(self.config.server_name.clone()).map_err(|e| {
            TransportError::Io {
                detail: format!("invalid server name `{}`: {e}", self.config.server_name),
            }
        })?;

        let tcp = ctx
            .run(TcpStream::connect(address.socket_addr))
            .await
            .ok_or(TransportError::Closed)?
            .map_err(|e| TransportError::Io { detail: e.to_string() })?;
        tcp.set_nodelay(true)
            .map_err(|e| TransportError::Io { detail: e.to_string() })?;

        let tls_stream = ctx
            .run(self.tls_connector.connect(server_name, tcp))
            .await
            .ok_or(TransportError::Closed)?
            .map_err(|e| TransportError::Io { detail: e.to_string() })?;

        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let connection: BoxTransport =
            MuxConnection::spawn_with_context(id, tls_stream, self.config.clone(), ctx.child());
        Ok(connection)
    }
}
