//! TLS configuration for HTTPS origins (`spec.md` §4.D): verification is on
//! by default, may be disabled per-rule, and a custom CA pool may replace
//! the system trust store.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use ferrule_core::error::{codes, CoreError, ErrorKind};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

/// Builds the `rustls::ClientConfig` used to dial one HTTPS origin.
/// `ca_pool_path`, if given, replaces the system trust store entirely
/// rather than extending it — matching the explicit, single-purpose
/// override semantics of `spec.md` §4.D.
pub fn build_client_config(no_tls_verify: bool, ca_pool_path: Option<&Path>) -> Result<ClientConfig, CoreError> {
    let builder = ClientConfig::builder();

    if no_tls_verify {
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth());
    }

    let mut roots = rustls::RootCertStore::empty();
    if let Some(path) = ca_pool_path {
        let file = File::open(path).map_err(|e| {
            CoreError::new(codes::TLS_HANDSHAKE_FAILED, ErrorKind::Configuration, format!("opening CA pool `{}`: {e}", path.display()))
        })?;
        let mut reader = BufReader::new(file);
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert = cert.map_err(|e| {
                CoreError::new(codes::TLS_HANDSHAKE_FAILED, ErrorKind::Configuration, format!("parsing CA pool: {e}"))
            })?;
            roots.add(cert).map_err(|e| {
                CoreError::new(codes::TLS_HANDSHAKE_FAILED, ErrorKind::Configuration, format!("loading CA cert: {e}"))
            })?;
        }
    } else {
        let native = rustls_native_certs::load_native_certs();
        for cert in native.certs {
            let _ = roots.add(cert);
        }
    }

    Ok(builder.with_root_certificates(roots).with_no_client_auth())
}

/// Accepts any server certificate. Only reachable via an explicit per-rule
/// `no_tls_verify` override, never the default.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
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
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
        ]
    }
}
