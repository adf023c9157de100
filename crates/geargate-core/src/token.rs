//! Path-segment tokens.
//!
//! A token travels as a single URL path segment:
//!
//! ```text
//! <payload>[.<signature>]
//! ```
//!
//! `payload` is unpadded URL-safe base64 of a JSON object with the short
//! keys `U` (user), `R` (resource locator), `T` (resource type),
//! `I` (request id) and `D` (issued-at, unix seconds). When the codec holds
//! a signing key, `signature` is the unpadded URL-safe base64 HMAC-SHA256
//! of the payload text and must verify.
//!
//! The literal segment [`TEST_TOKEN_SEGMENT`] switches to reading the same
//! keys from the query string, but only when test tokens are enabled.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::request_id::RequestId;

/// Segment that selects query-parameter tokens in test mode.
pub const TEST_TOKEN_SEGMENT: &str = "__test__";

type HmacSha256 = Hmac<Sha256>;

/// Errors produced while parsing a token or deriving its request id.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token is empty")]
    Empty,

    #[error("token payload is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("token payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("token is not signed")]
    Unsigned,

    #[error("token signature does not match")]
    BadSignature,

    #[error("query parameter {field} is invalid: {reason}")]
    Query { field: &'static str, reason: String },

    #[error("{0}")]
    RequestId(String),
}

impl TokenError {
    /// True when the token itself was acceptable but lacked the data needed
    /// to derive a request identifier.
    pub fn is_missing_data(&self) -> bool {
        matches!(self, TokenError::RequestId(_))
    }
}

/// A parsed token. Lives for the duration of one HTTP request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Requesting user.
    #[serde(rename = "U", default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    /// Route-dependent target locator (container id, repo id, content path).
    #[serde(rename = "R", default, skip_serializing_if = "String::is_empty")]
    pub locator: String,
    /// Route-dependent target kind (image, content type, base image).
    #[serde(rename = "T", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Explicit request identifier.
    #[serde(rename = "I", default, skip_serializing_if = "String::is_empty")]
    pub request: String,
    /// Issued-at, unix seconds.
    #[serde(rename = "D", default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<i64>,
}

impl Token {
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Target locator, empty when absent.
    pub fn resource_locator(&self) -> &str {
        &self.locator
    }

    /// Target kind, empty when absent.
    pub fn resource_type(&self) -> &str {
        &self.kind
    }

    /// Derive the request identifier for `operation`.
    ///
    /// An explicit `I` must decode and is used as given. Without one the
    /// identifier is a digest of the operation and the user, locator, type
    /// and issued-at fields, so the same token names a different request on
    /// each route and action.
    pub fn request_id(&self, operation: &str) -> Result<RequestId, TokenError> {
        if !self.request.is_empty() {
            return RequestId::decode(&self.request).map_err(TokenError::RequestId);
        }
        if operation.is_empty() {
            return Err(TokenError::RequestId(
                "no request identifier and no operation to derive one from".into(),
            ));
        }
        let issued = self.issued_at.map(|d| d.to_string()).unwrap_or_default();
        Ok(RequestId::derive(&[
            operation,
            &self.user,
            &self.locator,
            &self.kind,
            &issued,
        ]))
    }

    /// Encode the token as a path segment, signing it when a key is given.
    pub fn encode(&self, key: Option<&[u8]>) -> String {
        // Serializing a struct of strings and an optional integer cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        let payload = URL_SAFE_NO_PAD.encode(json);
        match key {
            Some(key) => {
                let signature = URL_SAFE_NO_PAD.encode(sign(key, payload.as_bytes()));
                format!("{payload}.{signature}")
            }
            None => payload,
        }
    }
}

/// Parses tokens according to the deployment's trust settings.
#[derive(Clone, Default)]
pub struct TokenCodec {
    key: Option<Vec<u8>>,
    allow_test: bool,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("signed", &self.key.is_some())
            .field("allow_test", &self.allow_test)
            .finish()
    }
}

impl TokenCodec {
    /// Create a codec. With `key`, every token must carry a valid signature.
    pub fn new(key: Option<Vec<u8>>, allow_test: bool) -> Self {
        Self { key, allow_test }
    }

    /// Whether `segment` selects query-parameter parsing.
    pub fn is_test_segment(&self, segment: &str) -> bool {
        self.allow_test && segment == TEST_TOKEN_SEGMENT
    }

    /// Parse a token from its path segment.
    pub fn parse_segment(&self, segment: &str) -> Result<Token, TokenError> {
        if segment.is_empty() {
            return Err(TokenError::Empty);
        }
        let (payload, signature) = match segment.split_once('.') {
            Some((payload, signature)) => (payload, Some(signature)),
            None => (segment, None),
        };

        if let Some(key) = &self.key {
            let signature = signature.ok_or(TokenError::Unsigned)?;
            let signature = URL_SAFE_NO_PAD
                .decode(signature)
                .map_err(|_| TokenError::BadSignature)?;
            let mut mac = HmacSha256::new_from_slice(key).map_err(|_| TokenError::BadSignature)?;
            mac.update(payload.as_bytes());
            mac.verify_slice(&signature)
                .map_err(|_| TokenError::BadSignature)?;
        }

        let json = URL_SAFE_NO_PAD.decode(payload)?;
        Ok(serde_json::from_slice(&json)?)
    }

    /// Build a token from query parameters (test mode).
    pub fn parse_query(&self, query: &HashMap<String, String>) -> Result<Token, TokenError> {
        let field = |name: &str| query.get(name).cloned().unwrap_or_default();
        let issued_at = match query.get("D").filter(|d| !d.is_empty()) {
            Some(d) => Some(d.parse::<i64>().map_err(|e| TokenError::Query {
                field: "D",
                reason: e.to_string(),
            })?),
            None => None,
        };
        Ok(Token {
            user: field("U"),
            locator: field("R"),
            kind: field("T"),
            request: field("I"),
            issued_at,
        })
    }
}

fn sign(key: &[u8], payload: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return Vec::new();
    };
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Token {
        Token {
            user: "alice".into(),
            locator: "c1".into(),
            kind: "img-x".into(),
            request: String::new(),
            issued_at: Some(1_700_000_000),
        }
    }

    #[test]
    fn unsigned_roundtrip_through_segment() {
        let codec = TokenCodec::default();
        let token = codec.parse_segment(&sample().encode(None)).unwrap();
        assert_eq!(token, sample());
        assert_eq!(token.user(), "alice");
        assert_eq!(token.resource_locator(), "c1");
        assert_eq!(token.resource_type(), "img-x");
    }

    #[test]
    fn absent_fields_read_as_empty() {
        let codec = TokenCodec::default();
        let segment = URL_SAFE_NO_PAD.encode(br#"{"U":"bob"}"#);
        let token = codec.parse_segment(&segment).unwrap();
        assert_eq!(token.resource_locator(), "");
        assert_eq!(token.resource_type(), "");
        assert!(token.issued_at.is_none());
    }

    #[test]
    fn signed_token_verifies() {
        let codec = TokenCodec::new(Some(b"secret".to_vec()), false);
        let segment = sample().encode(Some(b"secret"));
        assert_eq!(codec.parse_segment(&segment).unwrap(), sample());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let codec = TokenCodec::new(Some(b"secret".to_vec()), false);
        let segment = sample().encode(Some(b"other"));
        assert!(matches!(
            codec.parse_segment(&segment),
            Err(TokenError::BadSignature)
        ));
    }

    #[test]
    fn unsigned_token_rejected_when_key_configured() {
        let codec = TokenCodec::new(Some(b"secret".to_vec()), false);
        assert!(matches!(
            codec.parse_segment(&sample().encode(None)),
            Err(TokenError::Unsigned)
        ));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let codec = TokenCodec::new(Some(b"secret".to_vec()), false);
        let segment = sample().encode(Some(b"secret"));
        let (_, signature) = segment.split_once('.').unwrap();
        let mut forged = sample();
        forged.user = "mallory".into();
        let forged = format!("{}.{signature}", forged.encode(None));
        assert!(matches!(
            codec.parse_segment(&forged),
            Err(TokenError::BadSignature)
        ));
    }

    #[test]
    fn malformed_segments_are_rejected() {
        let codec = TokenCodec::default();
        assert!(matches!(codec.parse_segment(""), Err(TokenError::Empty)));
        assert!(matches!(
            codec.parse_segment("***"),
            Err(TokenError::Encoding(_))
        ));
        let not_json = URL_SAFE_NO_PAD.encode(b"hello");
        assert!(matches!(
            codec.parse_segment(&not_json),
            Err(TokenError::Payload(_))
        ));
    }

    #[test]
    fn test_segment_requires_opt_in() {
        assert!(!TokenCodec::default().is_test_segment(TEST_TOKEN_SEGMENT));
        assert!(TokenCodec::new(None, true).is_test_segment(TEST_TOKEN_SEGMENT));
        assert!(!TokenCodec::new(None, true).is_test_segment("other"));
    }

    #[test]
    fn parse_query_reads_fields() {
        let query: HashMap<String, String> = [("U", "u"), ("R", "a/b"), ("T", "text")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let token = TokenCodec::new(None, true).parse_query(&query).unwrap();
        assert_eq!(token.user(), "u");
        assert_eq!(token.resource_locator(), "a/b");
        assert_eq!(token.resource_type(), "text");
    }

    #[test]
    fn parse_query_rejects_bad_date() {
        let query = HashMap::from([("D".to_string(), "yesterday".to_string())]);
        let err = TokenCodec::new(None, true).parse_query(&query).unwrap_err();
        assert!(matches!(err, TokenError::Query { field: "D", .. }));
    }

    #[test]
    fn identical_tokens_share_request_id() {
        let op = "container-action:action=started";
        assert_eq!(sample().request_id(op).unwrap(), sample().request_id(op).unwrap());
        let mut other = sample();
        other.issued_at = Some(1_700_000_001);
        assert_ne!(sample().request_id(op).unwrap(), other.request_id(op).unwrap());
    }

    #[test]
    fn operations_derive_distinct_request_ids() {
        let started = sample().request_id("container-action:action=started").unwrap();
        let stopped = sample().request_id("container-action:action=stopped").unwrap();
        assert_ne!(started, stopped);
    }

    #[test]
    fn explicit_request_id_wins() {
        let mut token = sample();
        token.request = "0a0b".into();
        assert_eq!(token.request_id("any").unwrap().as_bytes(), &[0x0a, 0x0b]);
        assert_eq!(token.request_id("other").unwrap().as_bytes(), &[0x0a, 0x0b]);
    }

    #[test]
    fn undecodable_request_id_is_missing_data() {
        let mut token = sample();
        token.request = "%%%".into();
        let err = token.request_id("any").unwrap_err();
        assert!(err.is_missing_data());
    }

    #[test]
    fn derivation_needs_an_operation() {
        assert!(sample().request_id("").unwrap_err().is_missing_data());
    }
}
