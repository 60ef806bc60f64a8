//! Credentials file model (`spec.md` §6). Consumed, never written, by the
//! core; `ferruled` reads it from disk and hands the parsed value in.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{codes, CoreError, ErrorKind};
use crate::ids::TunnelId;

/// Raw JSON shape of the credentials file, field names matching the wire
/// format exactly (`AccountTag`, `TunnelSecret`, `TunnelID`, ...).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialsFile {
    #[serde(rename = "AccountTag")]
    pub account_tag: String,
    #[serde(rename = "TunnelSecret")]
    pub tunnel_secret: String,
    #[serde(rename = "TunnelID")]
    pub tunnel_id: TunnelId,
    #[serde(rename = "TunnelName", skip_serializing_if = "Option::is_none")]
    pub tunnel_name: Option<String>,
    #[serde(rename = "Endpoint", skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Parsed, in-memory form: the base64 `TunnelSecret` is decoded once at
/// load time so every later use of it is a plain byte slice.
#[derive(Clone)]
pub struct TunnelIdentity {
    pub tunnel_id: TunnelId,
    pub account_tag: String,
    pub shared_secret: Vec<u8>,
    pub tunnel_name: Option<String>,
    pub endpoint: Option<String>,
}

impl TunnelIdentity {
    /// Parse the JSON bytes of a credentials file into a usable identity.
    ///
    /// Fails with `ErrorKind::Credential` (`spec.md` §7: malformed
    /// credentials file is fatal at startup) on bad JSON or non-base64
    /// secrets.
    pub fn from_json(bytes: &[u8]) -> Result<Self, CoreError> {
        let file: CredentialsFile = serde_json::from_slice(bytes).map_err(|e| {
            tracing::warn!(error = %e, "credentials file is not valid JSON");
            CoreError::new(
                codes::MALFORMED_CREDENTIALS,
                ErrorKind::Credential,
                "credentials file is not valid JSON",
            )
            .with_source(e)
        })?;
        Self::from_file(file)
    }

    pub fn from_file(file: CredentialsFile) -> Result<Self, CoreError> {
        let shared_secret = base64::engine::general_purpose::STANDARD
            .decode(file.tunnel_secret.as_bytes())
            .map_err(|e| {
                CoreError::new(
                    codes::MALFORMED_CREDENTIALS,
                    ErrorKind::Credential,
                    "TunnelSecret is not valid base64",
                )
                .with_source(e)
            })?;
        Ok(Self {
            tunnel_id: file.tunnel_id,
            account_tag: file.account_tag,
            shared_secret,
            tunnel_name: file.tunnel_name,
            endpoint: file.endpoint,
        })
    }

    /// Render back to the wire shape, e.g. for diagnostics or re-persisting
    /// a rotated secret. Never logged whole — callers must redact
    /// `shared_secret` themselves; this type has no `Debug` impl on purpose.
    pub fn to_file(&self) -> CredentialsFile {
        CredentialsFile {
            account_tag: self.account_tag.clone(),
            tunnel_secret: base64::engine::general_purpose::STANDARD.encode(&self.shared_secret),
            tunnel_id: self.tunnel_id,
            tunnel_name: self.tunnel_name.clone(),
            endpoint: self.endpoint.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_then_render_round_trips() {
        let json = serde_json::json!({
            "AccountTag": "acct-123",
            "TunnelSecret": base64::engine::general_purpose::STANDARD.encode(b"super-secret"),
            "TunnelID": "df5ed608-b8b4-4109-89f3-9f2cf199df64",
            "TunnelName": "prod",
        });
        let bytes = serde_json::to_vec(&json).unwrap();
        let identity = TunnelIdentity::from_json(&bytes).unwrap();
        assert_eq!(identity.account_tag, "acct-123");
        assert_eq!(identity.shared_secret, b"super-secret");
        assert_eq!(identity.tunnel_name.as_deref(), Some("prod"));

        let rendered = identity.to_file();
        let round_tripped = TunnelIdentity::from_file(rendered).unwrap();
        assert_eq!(round_tripped.tunnel_id, identity.tunnel_id);
        assert_eq!(round_tripped.shared_secret, identity.shared_secret);
    }

    #[test]
    fn malformed_json_is_credential_error() {
        let err = TunnelIdentity::from_json(b"not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Credential);
    }

    #[test]
    fn bad_base64_secret_is_credential_error() {
        let json = serde_json::json!({
            "AccountTag": "acct-123",
            "TunnelSecret": "not-base64!!!",
            "TunnelID": "df5ed608-b8b4-4109-89f3-9f2cf199df64",
        });
        let bytes = serde_json::to_vec(&json).unwrap();
        let err = TunnelIdentity::from_json(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Credential);
    }
}
