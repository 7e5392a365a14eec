//! The shared session store contract.
//!
//! Streamable-http sessions persist here so another node can recreate
//! the adapter on failover. Every mutation is idempotent; every read is
//! validated against the caller's authorization hash by the registry
//! before being honored.

use super::TransportProtocol;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend unreachable or erroring
    #[error("session store unavailable: {0}")]
    Unavailable(String),

    /// Operation exceeded the configured budget
    #[error("session store operation timed out")]
    Timeout,
}

/// The session half of a persisted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Session id
    pub id: String,
    /// Protocol the session speaks
    pub protocol: TransportProtocol,
    /// When the session was first created
    pub created_at: DateTime<Utc>,
    /// Node that created (or last recreated) the session
    pub node_id: String,
    /// Opaque application payload carried across nodes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// A persisted session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session metadata
    pub session: SessionMeta,
    /// SHA-256 of the bearer token the session was created with
    pub authorization_id: String,
    /// Record creation time
    pub created_at: DateTime<Utc>,
    /// Refreshed on every request
    pub last_accessed_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Whether the record has idled past `ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.last_accessed_at > ttl
    }
}

/// Shared persistence for streamable-http sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace a record; keyed by session id.
    async fn put(&self, record: SessionRecord) -> Result<(), StoreError>;

    /// Read a record by session id.
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Delete a record; deleting an absent record is not an error.
    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;

    /// Refresh a record's `last_accessed_at`.
    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Process-local store for single-node deployments and tests.
#[derive(Default)]
pub struct InMemorySessionStore {
    records: DashMap<String, SessionRecord>,
}

impl fmt::Debug for InMemorySessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySessionStore")
            .field("len", &self.records.len())
            .finish()
    }
}

impl InMemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put(&self, record: SessionRecord) -> Result<(), StoreError> {
        self.records.insert(record.session.id.clone(), record);
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.records.get(session_id).map(|r| r.clone()))
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.records.remove(session_id);
        Ok(())
    }

    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(mut record) = self.records.get_mut(session_id) {
            record.last_accessed_at = at;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            session: SessionMeta {
                id: id.to_string(),
                protocol: TransportProtocol::StreamableHttp,
                created_at: now,
                node_id: "node-a".to_string(),
                payload: None,
            },
            authorization_id: "hash".to_string(),
            created_at: now,
            last_accessed_at: now,
        }
    }

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let store = InMemorySessionStore::new();
        store.put(record("s1")).await.unwrap();
        assert!(store.get("s1").await.unwrap().is_some());
        assert!(store.get("s2").await.unwrap().is_none());

        store.delete("s1").await.unwrap();
        assert!(store.get("s1").await.unwrap().is_none());
        // Idempotent delete.
        store.delete("s1").await.unwrap();
    }

    #[tokio::test]
    async fn touch_refreshes_last_accessed() {
        let store = InMemorySessionStore::new();
        store.put(record("s1")).await.unwrap();
        let later = Utc::now() + chrono::Duration::seconds(60);
        store.touch("s1", later).await.unwrap();
        assert_eq!(store.get("s1").await.unwrap().unwrap().last_accessed_at, later);
    }

    #[test]
    fn expiry_compares_last_access() {
        let mut r = record("s1");
        r.last_accessed_at = Utc::now() - chrono::Duration::seconds(120);
        assert!(r.is_expired(Utc::now(), chrono::Duration::seconds(60)));
        assert!(!r.is_expired(Utc::now(), chrono::Duration::seconds(600)));
    }

    #[test]
    fn record_serialization_shape() {
        let json = serde_json::to_value(record("s1")).unwrap();
        assert_eq!(json["session"]["id"], "s1");
        assert_eq!(json["session"]["protocol"], "streamable-http");
        assert_eq!(json["authorization_id"], "hash");
        assert!(json.get("last_accessed_at").is_some());
    }
}
