//! Request identifiers.
//!
//! A `RequestId` is the dispatcher's idempotency key. It is either carried
//! explicitly in a token (`I` field) or derived from the operation and the
//! token's identity fields, so two identical tokens sent to the same
//! operation always produce equal identifiers.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// Length in bytes of identifiers derived from token contents.
pub const DERIVED_LEN: usize = 16;

/// Longest explicit identifier accepted from a token.
pub const MAX_LEN: usize = 32;

/// Opaque, comparable request identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(Vec<u8>);

impl RequestId {
    /// Wrap raw identifier bytes.
    ///
    /// Returns `None` for empty input or input longer than [`MAX_LEN`].
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Option<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() || bytes.len() > MAX_LEN {
            return None;
        }
        Some(Self(bytes))
    }

    /// Decode an identifier as it appears in a token.
    ///
    /// Even-length all-hex input is read as hex; anything else must be
    /// unpadded URL-safe base64.
    pub fn decode(encoded: &str) -> Result<Self, String> {
        let bytes = if is_hex(encoded) {
            hex::decode(encoded).map_err(|e| format!("invalid hex request identifier: {e}"))?
        } else {
            URL_SAFE_NO_PAD
                .decode(encoded)
                .map_err(|e| format!("invalid request identifier encoding: {e}"))?
        };
        let len = bytes.len();
        Self::from_bytes(bytes)
            .ok_or_else(|| format!("request identifier must be 1-{MAX_LEN} bytes, got {len}"))
    }

    /// Derive an identifier from identity fields.
    ///
    /// Each field is length-prefixed before hashing so that field boundaries
    /// cannot be shifted to produce a collision (`"ab","c"` vs `"a","bc"`).
    pub fn derive(fields: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for field in fields {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        let digest = hasher.finalize();
        Self(digest[..DERIVED_LEN].to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.len() % 2 == 0 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        let a = RequestId::derive(&["u", "c1", "img", "0"]);
        let b = RequestId::derive(&["u", "c1", "img", "0"]);
        assert_eq!(a, b);
        assert_eq!(a.as_bytes().len(), DERIVED_LEN);
    }

    #[test]
    fn derive_respects_field_boundaries() {
        let a = RequestId::derive(&["ab", "c"]);
        let b = RequestId::derive(&["a", "bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn decode_hex() {
        let id = RequestId::decode("00ff10").unwrap();
        assert_eq!(id.as_bytes(), &[0x00, 0xff, 0x10]);
        assert_eq!(id.to_string(), "00ff10");
    }

    #[test]
    fn decode_base64() {
        let id = RequestId::decode("cmVxLTE").unwrap();
        assert_eq!(id.as_bytes(), b"req-1");
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(RequestId::decode("not base64!").is_err());
    }

    #[test]
    fn decode_rejects_oversized() {
        let long = "ab".repeat(MAX_LEN + 1);
        let err = RequestId::decode(&long).unwrap_err();
        assert!(err.contains("1-32 bytes"));
    }

    #[test]
    fn from_bytes_rejects_empty() {
        assert!(RequestId::from_bytes(Vec::new()).is_none());
    }
}
