//! The transport adapter registry.
//!
//! Holds every live adapter on this node keyed by the
//! `(protocol, authHash, sessionId)` triple, serializes create/recreate
//! per key through a key-scoped mutex, and validates every store read
//! against the caller's authorization hash. A store outage degrades the
//! registry to local-only operation.

use super::adapter::{OutboundSink, TransportAdapter};
use super::store::{SessionMeta, SessionRecord, SessionStore};
use super::{TransportKey, TransportProtocol, generate_session_id};
use crate::dispatch::McpDispatcher;
use crate::elicit::ElicitBroker;
use crate::error::{ServerError, ServerResult};
use crate::metrics::ServerMetrics;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Per-node registry of live transport adapters.
pub struct TransportRegistry {
    live: DashMap<String, Arc<TransportAdapter>>,
    creation_locks: DashMap<String, Arc<Mutex<()>>>,
    created_history: DashSet<String>,
    store: Option<Arc<dyn SessionStore>>,
    dispatcher: Arc<McpDispatcher>,
    elicits: Arc<ElicitBroker>,
    metrics: Arc<ServerMetrics>,
    node_id: String,
    store_timeout: Duration,
    graceful_shutdown: Duration,
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("live", &self.live.len())
            .field("node_id", &self.node_id)
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

impl TransportRegistry {
    /// Registry for one node.
    pub fn new(
        store: Option<Arc<dyn SessionStore>>,
        dispatcher: Arc<McpDispatcher>,
        elicits: Arc<ElicitBroker>,
        metrics: Arc<ServerMetrics>,
        node_id: impl Into<String>,
        store_timeout: Duration,
        graceful_shutdown: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            live: DashMap::new(),
            creation_locks: DashMap::new(),
            created_history: DashSet::new(),
            store,
            dispatcher,
            elicits,
            metrics,
            node_id: node_id.into(),
            store_timeout,
            graceful_shutdown,
        })
    }

    fn creation_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.creation_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_creation_lock(&self, key: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        // Drop the map entry once no other create/recreate holds a clone.
        self.creation_locks
            .remove_if(key, |_, entry| Arc::strong_count(entry) == 1);
    }

    /// Create (or return) the adapter for a triple; idempotent.
    ///
    /// Two concurrent calls for the same key return the same reference:
    /// creation is serialized by the key-scoped mutex and the second
    /// caller finds the adapter resident.
    pub async fn create_transporter(
        &self,
        protocol: TransportProtocol,
        token: &str,
        session_id: Option<String>,
        sink: Arc<dyn OutboundSink>,
    ) -> ServerResult<Arc<TransportAdapter>> {
        let session_id = match session_id {
            Some(id) => id,
            None if protocol.generates_session_id() => generate_session_id(),
            // The stateless transport has no session continuity and its
            // id generator is disabled.
            None => "stateless".to_string(),
        };
        if session_id.len() > super::MAX_SESSION_ID_LEN {
            return Err(ServerError::invalid_request("session id too long"));
        }

        let key = TransportKey::new(protocol, token, session_id);
        let key_str = key.storage_key();

        let lock = self.creation_lock(&key_str);
        let guard = lock.lock().await;

        if let Some(existing) = self.live.get(&key_str) {
            let adapter = Arc::clone(&existing);
            drop(existing);
            drop(guard);
            self.release_creation_lock(&key_str, lock);
            return Ok(adapter);
        }

        let adapter = TransportAdapter::new(
            key.clone(),
            sink,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.elicits),
        );
        adapter.connect().await?;

        if key.protocol.persists() {
            let now = Utc::now();
            let record = SessionRecord {
                session: SessionMeta {
                    id: key.session_id.clone(),
                    protocol: key.protocol,
                    created_at: now,
                    node_id: self.node_id.clone(),
                    payload: None,
                },
                authorization_id: key.auth_hash.as_str().to_string(),
                created_at: now,
                last_accessed_at: now,
            };
            self.store_put(record).await;
        }

        self.live.insert(key_str.clone(), Arc::clone(&adapter));
        self.created_history.insert(key_str.clone());
        self.metrics.record_adapter_created();
        tracing::info!(key = %key, "transport adapter created");

        drop(guard);
        self.release_creation_lock(&key_str, lock);
        Ok(adapter)
    }

    /// In-memory lookup only; never consults the store.
    pub fn get_transporter(&self, key: &TransportKey) -> Option<Arc<TransportAdapter>> {
        self.live.get(&key.storage_key()).map(|a| Arc::clone(&a))
    }

    /// Resident adapters for a session id, across protocols.
    pub fn find_by_session(&self, session_id: &str) -> Vec<Arc<TransportAdapter>> {
        self.live
            .iter()
            .filter(|entry| entry.value().key().session_id == session_id)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Read the stored session record, honoring it only when its
    /// authorization hash matches the caller's.
    pub async fn get_stored_session(
        &self,
        key: &TransportKey,
    ) -> ServerResult<Option<SessionRecord>> {
        if !key.protocol.persists() {
            return Ok(None);
        }
        let Some(store) = &self.store else {
            return Ok(None);
        };

        let record = match tokio::time::timeout(self.store_timeout, store.get(&key.session_id)).await
        {
            Ok(Ok(record)) => record,
            Ok(Err(err)) => {
                tracing::warn!(key = %key, error = %err, "session store read failed; degrading to local-only");
                return Ok(None);
            }
            Err(_) => {
                tracing::warn!(key = %key, "session store read timed out; degrading to local-only");
                return Ok(None);
            }
        };

        match record {
            Some(record) if record.authorization_id == key.auth_hash.as_str() => Ok(Some(record)),
            Some(_) => {
                // Wrong bearer: the record is treated as absent and the
                // mismatch is never surfaced to the caller.
                tracing::warn!(
                    session = %key.session_id,
                    "stored session authorization mismatch; treating as absent"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Recreate an adapter from a stored record (cross-node failover).
    ///
    /// The fresh adapter short-circuits the MCP handshake via
    /// `mark_as_initialized`; the original initialize ran on the node
    /// that created the session.
    pub async fn recreate_transporter(
        &self,
        key: &TransportKey,
        record: SessionRecord,
        sink: Arc<dyn OutboundSink>,
    ) -> ServerResult<Arc<TransportAdapter>> {
        let key_str = key.storage_key();
        let lock = self.creation_lock(&key_str);
        let guard = lock.lock().await;

        if let Some(existing) = self.live.get(&key_str) {
            let adapter = Arc::clone(&existing);
            drop(existing);
            drop(guard);
            self.release_creation_lock(&key_str, lock);
            return Ok(adapter);
        }

        let adapter = TransportAdapter::new(
            key.clone(),
            sink,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.elicits),
        );
        adapter.connect().await?;
        adapter.mark_as_initialized()?;

        let mut refreshed = record;
        refreshed.last_accessed_at = Utc::now();
        refreshed.session.node_id = self.node_id.clone();
        self.store_put(refreshed).await;

        self.live.insert(key_str.clone(), Arc::clone(&adapter));
        self.created_history.insert(key_str.clone());
        self.metrics.record_adapter_created();
        tracing::info!(key = %key, "transport adapter recreated from store");

        drop(guard);
        self.release_creation_lock(&key_str, lock);
        Ok(adapter)
    }

    /// Resolve an adapter for a request: resident, recreated from the
    /// store, or freshly created.
    pub async fn obtain(
        &self,
        protocol: TransportProtocol,
        token: &str,
        session_id: Option<String>,
        sink: Arc<dyn OutboundSink>,
    ) -> ServerResult<Arc<TransportAdapter>> {
        if let Some(session_id) = &session_id {
            let key = TransportKey::new(protocol, token, session_id.clone());
            if let Some(adapter) = self.get_transporter(&key) {
                return Ok(adapter);
            }
            if let Some(record) = self.get_stored_session(&key).await? {
                return self.recreate_transporter(&key, record, sink).await;
            }
            // A presented streamable id we cannot verify against the
            // store is never adopted; the client gets a fresh session.
            if protocol.persists() {
                return self.create_transporter(protocol, token, None, sink).await;
            }
        }
        self.create_transporter(protocol, token, session_id, sink)
            .await
    }

    /// Destroy a resident adapter; `InvalidSession` when absent.
    pub async fn destroy_transporter(&self, key: &TransportKey) -> ServerResult<()> {
        let key_str = key.storage_key();
        let Some((_, adapter)) = self.live.remove(&key_str) else {
            return Err(ServerError::InvalidSession {
                session_id: key.session_id.clone(),
            });
        };

        adapter.destroy(self.graceful_shutdown).await?;
        self.created_history.insert(key_str);
        self.metrics.record_adapter_destroyed();

        if key.protocol.persists()
            && let Some(store) = &self.store
            && let Err(err) =
                tokio::time::timeout(self.store_timeout, store.delete(&key.session_id))
                    .await
                    .unwrap_or(Err(super::StoreError::Timeout))
        {
            tracing::warn!(key = %key, error = %err, "session store delete failed");
        }

        self.dispatcher.shared().drop_session(&key.session_id);
        tracing::info!(key = %key, "transport adapter destroyed");
        Ok(())
    }

    /// Whether this node ever created or destroyed the triple.
    pub fn was_session_created(&self, key: &TransportKey) -> bool {
        self.created_history.contains(&key.storage_key())
    }

    /// Like [`was_session_created`], but also consults the store (with
    /// authorization verification) for triples other nodes created.
    ///
    /// [`was_session_created`]: TransportRegistry::was_session_created
    pub async fn was_session_created_async(&self, key: &TransportKey) -> ServerResult<bool> {
        if self.was_session_created(key) {
            return Ok(true);
        }
        if !key.protocol.persists() {
            return Ok(false);
        }
        Ok(self.get_stored_session(key).await?.is_some())
    }

    /// Destroy adapters idle past `ttl`; returns how many were reaped.
    pub async fn sweep_idle(&self, ttl: Duration) -> usize {
        let stale: Vec<TransportKey> = self
            .live
            .iter()
            .filter(|entry| entry.value().idle_for() > ttl)
            .map(|entry| entry.value().key().clone())
            .collect();

        let mut reaped = 0;
        for key in stale {
            if self.destroy_transporter(&key).await.is_ok() {
                reaped += 1;
            }
        }
        reaped
    }

    /// Destroy every resident adapter (server shutdown).
    pub async fn shutdown(&self) {
        let keys: Vec<TransportKey> = self
            .live
            .iter()
            .map(|entry| entry.value().key().clone())
            .collect();
        for key in keys {
            if let Err(err) = self.destroy_transporter(&key).await {
                tracing::warn!(key = %key, error = %err, "adapter shutdown failed");
            }
        }
    }

    /// Number of live adapters on this node.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    async fn store_put(&self, record: SessionRecord) {
        let Some(store) = &self.store else {
            return;
        };
        let session_id = record.session.id.clone();
        match tokio::time::timeout(self.store_timeout, store.put(record)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(session = %session_id, error = %err, "session store write failed; continuing local-only");
            }
            Err(_) => {
                tracing::warn!(session = %session_id, "session store write timed out; continuing local-only");
            }
        }
    }

    /// Refresh a persisted session's `last_accessed_at`.
    pub async fn touch_session(&self, key: &TransportKey) {
        if !key.protocol.persists() {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };
        if tokio::time::timeout(self.store_timeout, store.touch(&key.session_id, Utc::now()))
            .await
            .is_err()
        {
            tracing::warn!(key = %key, "session store touch timed out");
        }
    }
}
