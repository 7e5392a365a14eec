//! Transport layer: content-addressed keys, per-session adapters, the
//! adapter registry, and the shared session store contract.

pub mod adapter;
pub mod registry;
pub mod sse;
pub mod store;

pub use adapter::{
    AdapterState, ChannelSink, OutboundFrame, OutboundSink, RequestOutcome, TransportAdapter,
};
pub use registry::TransportRegistry;
pub use store::{InMemorySessionStore, SessionMeta, SessionRecord, SessionStore, StoreError};

use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Cap on externally supplied session ids.
pub const MAX_SESSION_ID_LEN: usize = 256;

/// The protocols a session can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportProtocol {
    /// One long-lived bidirectional channel per session
    StreamableHttp,
    /// Legacy SSE stream plus client POSTs
    Sse,
    /// Single request/response, no session continuity
    StatelessHttp,
    /// In-process delivery
    Local,
}

impl TransportProtocol {
    /// Wire name of the protocol.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StreamableHttp => "streamable-http",
            Self::Sse => "sse",
            Self::StatelessHttp => "stateless-http",
            Self::Local => "local",
        }
    }

    /// Only streamable-http sessions are persisted to the shared store.
    pub fn persists(&self) -> bool {
        matches!(self, Self::StreamableHttp)
    }

    /// Stateless transports have their session-id generator disabled.
    pub fn generates_session_id(&self) -> bool {
        !matches!(self, Self::StatelessHttp)
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SHA-256 of the bearer token, hex-encoded.
///
/// The session's binding identity in the store: a persisted record is
/// only honored when the presenting request hashes to the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthHash(String);

impl AuthHash {
    /// Hash a bearer token.
    pub fn from_token(token: &str) -> Self {
        let digest = Sha256::digest(token.as_bytes());
        Self(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The content-addressed identity of a transport adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportKey {
    /// Protocol of the session
    pub protocol: TransportProtocol,
    /// SHA-256 of the bearer token
    pub auth_hash: AuthHash,
    /// Session id
    pub session_id: String,
}

impl TransportKey {
    /// Key from a raw bearer token.
    pub fn new(protocol: TransportProtocol, token: &str, session_id: impl Into<String>) -> Self {
        Self {
            protocol,
            auth_hash: AuthHash::from_token(token),
            session_id: session_id.into(),
        }
    }

    /// Canonical string form, used as the map key.
    pub fn storage_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.protocol.as_str(),
            self.auth_hash.as_str(),
            self.session_id
        )
    }
}

impl fmt::Display for TransportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Hash elided: keys appear in logs.
        write!(f, "{}:{}", self.protocol.as_str(), self.session_id)
    }
}

/// Generate a fresh session id: `mcp-` plus 128 random bits as hex.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    // Fail closed: a predictable session id is worse than no session.
    getrandom::getrandom(&mut bytes).expect("cryptographic RNG unavailable");
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("mcp-{hex}")
}

/// Response headers every streamable-http reply carries.
pub fn response_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(
        "access-control-expose-headers",
        HeaderValue::from_static("WWW-Authenticate"),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_hash_is_sha256_hex() {
        let hash = AuthHash::from_token("token-1");
        assert_eq!(hash.as_str().len(), 64);
        assert_eq!(hash, AuthHash::from_token("token-1"));
        assert_ne!(hash, AuthHash::from_token("token-2"));
    }

    #[test]
    fn storage_key_is_the_triple() {
        let key = TransportKey::new(TransportProtocol::StreamableHttp, "tok", "sess-1");
        let rendered = key.storage_key();
        assert!(rendered.starts_with("streamable-http:"));
        assert!(rendered.ends_with(":sess-1"));
    }

    #[test]
    fn session_ids_are_unique_and_prefixed() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert!(a.starts_with("mcp-"));
        assert_eq!(a.len(), 4 + 32);
        assert_ne!(a, b);
    }

    #[test]
    fn stateless_never_generates_or_persists() {
        assert!(!TransportProtocol::StatelessHttp.generates_session_id());
        assert!(!TransportProtocol::StatelessHttp.persists());
        assert!(TransportProtocol::StreamableHttp.persists());
        assert!(!TransportProtocol::Sse.persists());
    }

    #[test]
    fn headers_match_wire_contract() {
        let headers = response_headers();
        assert_eq!(
            headers.get(CONTENT_TYPE).unwrap(),
            "application/json; charset=utf-8"
        );
        assert_eq!(headers.get(CACHE_CONTROL).unwrap(), "no-cache, no-transform");
        assert_eq!(
            headers.get("access-control-expose-headers").unwrap(),
            "WWW-Authenticate"
        );
    }
}
