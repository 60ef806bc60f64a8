//! Maps a routed `ServiceDescriptor` to an origin connection and pipes an
//! accepted stream's bytes to/from it (`spec.md` §4.D, §4.E, §4.H `live`
//! state: "dispatch to E").
//!
//! HTTP and HTTPS origins are forwarded as raw bytes rather than
//! reconstructed request/response objects: the inbound stream already
//! carries a framed HTTP/1.1 exchange from the edge, so a plain TCP dial
//! to the origin followed by `copy_bidirectional` is enough, and it keeps
//! dispatch uniform across every byte-stream `ServiceDescriptor` variant.
//! `HelloWorld` and `Management` never reach this function —
//! [`ferrule_dialer::OriginDialer`] already refuses to dial them.

use ferrule_core::error::{codes, CoreError, ErrorKind};
use ferrule_dialer::OriginDialer;
use ferrule_router::ServiceDescriptor;
use ferrule_transport::stream::BoxStream;
use tokio::io::copy_bidirectional;
use tokio::net::TcpStream;

pub async fn dispatch(
    dialer: &OriginDialer,
    descriptor: &ServiceDescriptor,
    jump_destination: Option<&str>,
    mut inbound: BoxStream,
) -> Result<(), CoreError> {
    let mut origin = origin_stream(dialer, descriptor, jump_destination).await?;
    copy_bidirectional(&mut inbound, &mut origin).await.map_err(|e| {
        CoreError::new("dialer.proxy_io_error", ErrorKind::TransportTransient, e.to_string())
    })?;
    Ok(())
}

async fn origin_stream(
    dialer: &OriginDialer,
    descriptor: &ServiceDescriptor,
    jump_destination: Option<&str>,
) -> Result<TcpStream, CoreError> {
    match descriptor {
        ServiceDescriptor::HttpUrl(url) | ServiceDescriptor::HttpsUrl(url) => {
            let target = http_origin_target(url)?;
            TcpStream::connect(&target).await.map_err(|e| {
                CoreError::new(codes::CONNECTION_REFUSED, ErrorKind::TransportTransient, e.to_string())
            })
        }
        other => dialer.dial_stream(other, jump_destination).await,
    }
}

fn http_origin_target(url: &str) -> Result<String, CoreError> {
    let (without_scheme, default_port) = if let Some(rest) = url.strip_prefix("https://") {
        (rest, 443)
    } else if let Some(rest) = url.strip_prefix("http://") {
        (rest, 80)
    } else {
        (url, 80)
    };
    let host_port = without_scheme.split('/').next().unwrap_or(without_scheme);
    if host_port.is_empty() {
        return Err(CoreError::new(
            codes::INVALID_RULESET,
            ErrorKind::Configuration,
            format!("empty origin host in `{url}`"),
        ));
    }
    if host_port.contains(':') {
        Ok(host_port.to_string())
    } else {
        Ok(format!("{host_port}:{default_port}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_origin_target_defaults_port_80() {
        assert_eq!(http_origin_target("http://localhost/foo").unwrap(), "localhost:80");
    }

    #[test]
    fn https_origin_target_defaults_port_443() {
        assert_eq!(http_origin_target("https://origin.internal").unwrap(), "origin.internal:443");
    }

    #[test]
    fn explicit_port_is_preserved() {
        assert_eq!(http_origin_target("http://localhost:9090/a/b").unwrap(), "localhost:9090");
    }
}
