//! HTTP(S) and unix-socket origin dialing (`spec.md` §4.D). One HTTP/1.1
//! connection is established per pooled slot via `hyper::client::conn`, the
//! low-level API, since the dialer needs to hand callers a raw streaming
//! response rather than buffer it the way a high-level client would.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use ferrule_core::error::{codes, CoreError, ErrorKind};
use http::uri::Scheme;
use http::{Request, Response, Uri};
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;
use hyper::client::conn::http1::{handshake, SendRequest};
use hyper_util::rt::TokioIo;
use rustls_pki_types::ServerName;
use tokio::net::{TcpStream, UnixStream};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::pool::ConnectionPool;
use crate::tls::build_client_config;

pub type RequestBody = BoxBody<Bytes, hyper::Error>;

/// Dials HTTP, HTTPS and unix-socket origins, pooling idle connections per
/// destination (`spec.md` §4.D keepalive-connections/keepalive-timeout).
pub struct HttpDialer {
    pool: ConnectionPool<SendRequest<RequestBody>>,
    connect_timeout: Duration,
}

impl HttpDialer {
    pub fn new(keepalive_connections: usize, keepalive_timeout: Duration, connect_timeout: Duration) -> Self {
        Self { pool: ConnectionPool::new(keepalive_connections, keepalive_timeout), connect_timeout }
    }

    /// Sends one request to an `http://`/`https://` origin, reusing a pooled
    /// connection when one is available.
    pub async fn dial_url(
        &self,
        base_url: &str,
        no_tls_verify: bool,
        ca_pool_path: Option<&Path>,
        tls_server_name: Option<&str>,
        request: Request<RequestBody>,
    ) -> Result<Response<Incoming>, CoreError> {
        let uri: Uri = base_url.parse().map_err(|e| {
            CoreError::new(codes::DNS_ERROR, ErrorKind::Configuration, format!("invalid origin URL `{base_url}`: {e}"))
        })?;
        let is_https = uri.scheme() == Some(&Scheme::HTTPS);
        let host = uri.host().ok_or_else(|| {
            CoreError::new(codes::DNS_ERROR, ErrorKind::Configuration, format!("origin URL `{base_url}` has no host"))
        })?;
        let port = uri.port_u16().unwrap_or(if is_https { 443 } else { 80 });
        let key = format!("{}://{host}:{port}", uri.scheme_str().unwrap_or("http"));

        let mut sender = match self.pool.checkout(&key) {
            Some(sender) => sender,
            None => {
                self.dial_new_http(host, port, is_https, no_tls_verify, ca_pool_path, tls_server_name, &key).await?
            }
        };

        let response = sender.send_request(request).await.map_err(|e| {
            CoreError::new(codes::CONNECTION_REFUSED, ErrorKind::Stream, format!("sending request to `{base_url}`: {e}"))
        })?;
        // Checked back in immediately, ahead of the caller draining the
        // response body: HTTP/1.1 pipelining lets hyper queue the next
        // request behind the in-flight response on the same connection.
        self.pool.checkin(&key, sender);
        Ok(response)
    }

    /// Sends one request to an origin reached over an AF_UNIX socket.
    pub async fn dial_unix(&self, path: &Path, request: Request<RequestBody>) -> Result<Response<Incoming>, CoreError> {
        let key = format!("unix:{}", path.display());
        let mut sender = match self.pool.checkout(&key) {
            Some(sender) => sender,
            None => {
                let stream = timeout(self.connect_timeout, UnixStream::connect(path)).await.map_err(|_| {
                    CoreError::new(codes::TIMEOUT_EXCEEDED, ErrorKind::Stream, format!("connecting to unix socket `{}` timed out", path.display()))
                })?.map_err(|e| {
                    CoreError::new(codes::CONNECTION_REFUSED, ErrorKind::Stream, format!("connecting to unix socket `{}`: {e}", path.display()))
                })?;
                let (sender, conn) = handshake(TokioIo::new(stream)).await.map_err(|e| {
                    CoreError::new(codes::CONNECTION_REFUSED, ErrorKind::Stream, format!("HTTP handshake over `{}`: {e}", path.display()))
                })?;
                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        debug!(error = %e, "unix origin connection closed");
                    }
                });
                sender
            }
        };

        let response = sender.send_request(request).await.map_err(|e| {
            CoreError::new(codes::CONNECTION_REFUSED, ErrorKind::Stream, format!("sending request over `{}`: {e}", path.display()))
        })?;
        self.pool.checkin(&key, sender);
        Ok(response)
    }

    #[allow(clippy::too_many_arguments)]
    async fn dial_new_http(
        &self,
        host: &str,
        port: u16,
        is_https: bool,
        no_tls_verify: bool,
        ca_pool_path: Option<&Path>,
        tls_server_name: Option<&str>,
        key: &str,
    ) -> Result<SendRequest<RequestBody>, CoreError> {
        let tcp = timeout(self.connect_timeout, TcpStream::connect((host, port))).await.map_err(|_| {
            CoreError::new(codes::TIMEOUT_EXCEEDED, ErrorKind::Stream, format!("connecting to `{key}` timed out"))
        })?.map_err(|e| classify_connect_error(key, e))?;
        let _ = tcp.set_nodelay(true);

        let sender = if is_https {
            let config = build_client_config(no_tls_verify, ca_pool_path)?;
            let connector = TlsConnector::from(std::sync::Arc::new(config));
            let sni = tls_server_name.unwrap_or(host);
            let server_name = ServerName::try_from(sni.to_string()).map_err(|e| {
                CoreError::new(codes::TLS_HANDSHAKE_FAILED, ErrorKind::Configuration, format!("invalid TLS server name `{sni}`: {e}"))
            })?;
            let tls_stream = connector.connect(server_name, tcp).await.map_err(|e| {
                CoreError::new(codes::TLS_HANDSHAKE_FAILED, ErrorKind::Stream, format!("TLS handshake with `{key}`: {e}"))
            })?;
            let (sender, conn) = handshake(TokioIo::new(tls_stream)).await.map_err(|e| {
                CoreError::new(codes::CONNECTION_REFUSED, ErrorKind::Stream, format!("HTTP handshake with `{key}`: {e}"))
            })?;
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(error = %e, "https origin connection closed");
                }
            });
            sender
        } else {
            let (sender, conn) = handshake(TokioIo::new(tcp)).await.map_err(|e| {
                CoreError::new(codes::CONNECTION_REFUSED, ErrorKind::Stream, format!("HTTP handshake with `{key}`: {e}"))
            })?;
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(error = %e, "http origin connection closed");
                }
            });
            sender
        };

        Ok(sender)
    }
}

fn classify_connect_error(key: &str, e: std::io::Error) -> CoreError {
    use std::io::ErrorKind as IoKind;
    match e.kind() {
        IoKind::ConnectionRefused => {
            CoreError::new(codes::CONNECTION_REFUSED, ErrorKind::Stream, format!("origin `{key}` refused the connection"))
        }
        _ => {
            warn!(origin = key, error = %e, "origin dial failed");
            CoreError::new(codes::CONNECTION_REFUSED, ErrorKind::Stream, format!("dialing `{key}`: {e}"))
        }
    }
}
