//! [`QuicTransportFactory`]: owns the client [`quinn::Endpoint`] and dials
//! new QUIC connections to the edge (`spec.md` §4.C, §6).

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
use quinn::{ClientConfig, Endpoint, TransportConfig};

use crate::config::QuicConfig;
use crate::connection::QuicConnection;

pub struct QuicTransportFactory {
    endpoint: Endpoint,
    config: QuicConfig,
    next_connection_id: AtomicU64,
}

impl QuicTransportFactory {
    /// Build a client endpoint bound to an ephemeral local port. `tls_config`
    /// must have been constructed with ALPN set to whatever the edge expects.
    pub fn new(
        bind_addr: std::net::SocketAddr,
        tls_config: rustls::ClientConfig,
        config: QuicConfig,
    ) -> Result<Self, TransportError> {
        let mut endpoint = Endpoint::client(bind_addr)
            .map_err(|e| TransportError::Io { detail: e.to_string() })?;

        let mut transport = TransportConfig::default();
        let idle_millis = config.idle_timeout().as_millis().min(u64::MAX as u128) as u64;
        let idle_varint = quinn::VarInt::from_u64(idle_millis).unwrap_or(quinn::VarInt::MAX);
        transport.max_idle_timeout(Some(idle_varint.into()));
        transport.receive_window(
            quinn::VarInt::from_u32(config.connection_window),
        );
        transport.stream_receive_window(
            quinn::VarInt::from_u32(config.stream_window),
        );
        transport.mtu_discovery_config(if config.pmtu_discovery {
            Some(quinn::MtuDiscoveryConfig::default())
        } else {
            None
        });

        let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(tls_config)
            .map_err(|e| TransportError::Io { detail: e.to_string() })?;
        let mut client_config = ClientConfig::new(Arc::new(quic_crypto));
        client_config.transport_config(Arc::new(transport));
        endpoint.set_default_client_config(client_config);

        Ok(Self {
            endpoint,
            config,
            next_connection_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl TransportFactory for QuicTransportFactory {
    fn protocol(&self) -> ProtocolChoice {
        ProtocolChoice::Quic
    }

    async fn dial(
        &self,
        ctx: &ExecutionContext,
        address: &EdgeAddress,
    ) -> Result<BoxTransport, TransportError> {
        let connecting = self
            .endpoint
            .connect(address.socket_addr, &self.config.server_name)
            .map_err(|e| TransportError::Io { detail: e.to_string() })?;

        let connection = ctx
            .run(connecting)
            .await
            .ok_or(TransportError::Closed)?
            .map_err(|e| TransportError::Io { detail: e.to_string() })?;

        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let transport: BoxTransport = QuicConnection::spawn(id, connection, self.config.clone());
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::{DigitallySignedStruct, SignatureScheme};
    use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

    use super::*;

    #[derive(Debug)]
    struct AcceptAnyCert;

    impl ServerCertVerifier for AcceptAnyCert {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ED25519,
            ]
        }
    }

    fn insecure_tls_config() -> rustls::ClientConfig {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
            .with_no_client_auth()
    }

    #[test]
    fn new_binds_an_ephemeral_client_endpoint() {
        let mut tls_config = insecure_tls_config();
        tls_config.alpn_protocols = vec![b"h3".to_vec()];
        let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

        let factory = QuicTransportFactory::new(bind_addr, tls_config, QuicConfig::new("edge.example.com")).unwrap();
        assert_eq!(factory.protocol(), ProtocolChoice::Quic);
    }
}
