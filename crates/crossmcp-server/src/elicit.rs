//! The elicitation broker.
//!
//! Tracks at most one pending elicit per session, enforces the TTL band,
//! and routes results to whichever node holds the waiting tool through
//! the pending-elicit store's pub/sub channel. All three completion
//! paths (result, timeout, cancellation) settle through a single atomic
//! guard.

use crate::config::{ElicitationConfig, clamp_elicit_ttl};
use crate::error::{ServerError, ServerResult};
use crate::metrics::ServerMetrics;
use crate::transport::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crossmcp_protocol::elicitation::{
    ElicitCreateParams, ElicitMode, ElicitResult, ElicitResultParams, normalize_result,
};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};

/// Caller-facing options for starting an elicit.
#[derive(Debug, Clone)]
pub struct ElicitOptions {
    /// Collection mode
    pub mode: ElicitMode,
    /// External URL (url mode)
    pub url: Option<String>,
    /// Requested TTL; clamped into the allowed band
    pub ttl: Option<Duration>,
}

impl Default for ElicitOptions {
    fn default() -> Self {
        Self {
            mode: ElicitMode::Form,
            url: None,
            ttl: None,
        }
    }
}

/// A persisted pending elicit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingElicit {
    /// Correlation id
    pub elicit_id: String,
    /// Owning session
    pub session_id: String,
    /// Request id of the tool call that started the elicit
    pub related_request_id: Option<String>,
    /// Collection mode
    pub mode: ElicitMode,
    /// Schema of the expected content
    pub requested_schema: Option<Value>,
    /// Message shown to the user
    pub message: String,
    /// When the elicit expires
    pub expires_at: DateTime<Utc>,
}

/// Live subscription to one elicit's result channel.
pub struct ResultSubscription {
    rx: mpsc::UnboundedReceiver<ElicitResultParams>,
    _guard: Option<Box<dyn Send + Sync>>,
}

impl fmt::Debug for ResultSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResultSubscription")
    }
}

impl ResultSubscription {
    /// Subscription over a receiver plus an unsubscribe guard.
    pub fn new(
        rx: mpsc::UnboundedReceiver<ElicitResultParams>,
        guard: Option<Box<dyn Send + Sync>>,
    ) -> Self {
        Self { rx, _guard: guard }
    }

    async fn recv(&mut self) -> Option<ElicitResultParams> {
        self.rx.recv().await
    }
}

/// Shared pending/result persistence.
///
/// When the store is encrypted per session, the session id is the
/// client-binding secret: another session cannot read this session's
/// pending record or result.
#[async_trait]
pub trait PendingElicitStore: Send + Sync {
    /// Replace the session's pending record, returning the evicted one.
    async fn put_pending(
        &self,
        session_id: &str,
        record: PendingElicit,
    ) -> Result<Option<PendingElicit>, StoreError>;

    /// The session's active pending record, if any.
    async fn get_pending(&self, session_id: &str) -> Result<Option<PendingElicit>, StoreError>;

    /// Remove the session's pending record.
    async fn delete_pending(&self, session_id: &str) -> Result<(), StoreError>;

    /// Deliver a result to whichever node subscribed for this elicit id.
    /// Deliveries are idempotent per elicit id.
    async fn publish_result(
        &self,
        elicit_id: &str,
        result: ElicitResultParams,
        session_id: &str,
    ) -> Result<(), StoreError>;

    /// Subscribe for one elicit id's result.
    async fn subscribe_result(
        &self,
        elicit_id: &str,
        session_id: &str,
    ) -> Result<ResultSubscription, StoreError>;
}

/// Process-local pending store for single-node deployments and tests.
#[derive(Default)]
pub struct InMemoryPendingStore {
    pending: DashMap<String, PendingElicit>,
    channels: Arc<DashMap<String, mpsc::UnboundedSender<ElicitResultParams>>>,
    delivered: DashSet<String>,
}

impl fmt::Debug for InMemoryPendingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryPendingStore")
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl InMemoryPendingStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

struct ChannelGuard {
    channels: Arc<DashMap<String, mpsc::UnboundedSender<ElicitResultParams>>>,
    elicit_id: String,
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        self.channels.remove(&self.elicit_id);
    }
}

#[async_trait]
impl PendingElicitStore for InMemoryPendingStore {
    async fn put_pending(
        &self,
        session_id: &str,
        record: PendingElicit,
    ) -> Result<Option<PendingElicit>, StoreError> {
        Ok(self.pending.insert(session_id.to_string(), record))
    }

    async fn get_pending(&self, session_id: &str) -> Result<Option<PendingElicit>, StoreError> {
        Ok(self.pending.get(session_id).map(|r| r.clone()))
    }

    async fn delete_pending(&self, session_id: &str) -> Result<(), StoreError> {
        self.pending.remove(session_id);
        Ok(())
    }

    async fn publish_result(
        &self,
        elicit_id: &str,
        result: ElicitResultParams,
        _session_id: &str,
    ) -> Result<(), StoreError> {
        if !self.delivered.insert(elicit_id.to_string()) {
            // Second delivery for the same elicit id: idempotent no-op.
            return Ok(());
        }
        if let Some(tx) = self.channels.get(elicit_id) {
            let _ = tx.send(result);
        }
        Ok(())
    }

    async fn subscribe_result(
        &self,
        elicit_id: &str,
        _session_id: &str,
    ) -> Result<ResultSubscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.insert(elicit_id.to_string(), tx);
        let guard = ChannelGuard {
            channels: Arc::clone(&self.channels),
            elicit_id: elicit_id.to_string(),
        };
        Ok(ResultSubscription::new(rx, Some(Box::new(guard))))
    }
}

struct LocalPending {
    elicit_id: String,
    cancel_tx: oneshot::Sender<String>,
}

/// A registered waiter for one elicit.
#[derive(Debug)]
pub struct ElicitWaiter {
    session_id: String,
    elicit_id: String,
    requested_schema: Option<Value>,
    ttl: Duration,
    subscription: ResultSubscription,
    cancel_rx: oneshot::Receiver<String>,
    settled: Arc<AtomicBool>,
}

enum Settlement {
    Result(ElicitResultParams),
    Timeout,
    Cancelled(String),
}

/// Brokers pending elicits for every session on this node.
pub struct ElicitBroker {
    store: Arc<dyn PendingElicitStore>,
    session_locks: DashMap<String, Arc<Mutex<()>>>,
    local: DashMap<String, LocalPending>,
    config: ElicitationConfig,
    metrics: Arc<ServerMetrics>,
}

impl fmt::Debug for ElicitBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElicitBroker")
            .field("local_pending", &self.local.len())
            .finish()
    }
}

impl ElicitBroker {
    /// Broker over a pending store.
    pub fn new(
        store: Arc<dyn PendingElicitStore>,
        config: ElicitationConfig,
        metrics: Arc<ServerMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            session_locks: DashMap::new(),
            local: DashMap::new(),
            config,
            metrics,
        })
    }

    /// Allocate a fresh elicit id.
    pub fn next_elicit_id() -> String {
        format!("elicit-{}", uuid::Uuid::new_v4())
    }

    /// Clamp a requested TTL, falling back to the configured default.
    pub fn clamp_ttl(&self, requested: Option<Duration>) -> Duration {
        match requested {
            Some(ttl) => clamp_elicit_ttl(ttl),
            None => self.config.default_ttl(),
        }
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.session_locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Persist a pending record, superseding (and cancelling) any prior
    /// elicit for the session.
    pub async fn persist_pending(&self, record: PendingElicit) -> ServerResult<()> {
        let session_id = record.session_id.clone();
        let lock = self.session_lock(&session_id);
        let _guard = lock.lock().await;

        let evicted = self
            .store
            .put_pending(&session_id, record)
            .await
            .map_err(|e| ServerError::store(e.to_string()))?;
        if let Some(evicted) = evicted {
            self.cancel_local(&session_id, &evicted.elicit_id, "superseded");
        }
        Ok(())
    }

    /// Register the local waiter for an elicit this node just persisted.
    pub async fn prepare(
        &self,
        session_id: &str,
        params: &ElicitCreateParams,
    ) -> ServerResult<ElicitWaiter> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let pending = self
            .store
            .get_pending(session_id)
            .await
            .map_err(|e| ServerError::store(e.to_string()))?;
        let (ttl, requested_schema) = match pending {
            Some(record) if record.elicit_id == params.elicit_id => {
                let remaining = (record.expires_at - Utc::now()).num_milliseconds().max(0);
                (
                    Duration::from_millis(remaining as u64),
                    record.requested_schema,
                )
            }
            // Store degraded or the record was superseded under us; fall
            // back to the default band so the waiter still expires.
            _ => (self.config.default_ttl(), params.requested_schema.clone()),
        };

        let subscription = self
            .store
            .subscribe_result(&params.elicit_id, session_id)
            .await
            .map_err(|e| ServerError::store(e.to_string()))?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        // A leftover waiter for the session means it was superseded
        // before we got here.
        if let Some((_, prior)) = self.local.remove(session_id) {
            let _ = prior.cancel_tx.send("superseded".to_string());
        }
        self.local.insert(
            session_id.to_string(),
            LocalPending {
                elicit_id: params.elicit_id.clone(),
                cancel_tx,
            },
        );

        self.metrics.record_elicitation_started();
        Ok(ElicitWaiter {
            session_id: session_id.to_string(),
            elicit_id: params.elicit_id.clone(),
            requested_schema,
            ttl,
            subscription,
            cancel_rx,
            settled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Await a waiter's settlement: result, TTL expiry, or cancellation.
    pub async fn await_result(&self, mut waiter: ElicitWaiter) -> ServerResult<ElicitResult> {
        let settlement = tokio::select! {
            result = waiter.subscription.recv() => match result {
                Some(params) => Settlement::Result(params),
                None => Settlement::Cancelled("result channel closed".to_string()),
            },
            cause = &mut waiter.cancel_rx => {
                Settlement::Cancelled(cause.unwrap_or_else(|_| "cancelled".to_string()))
            }
            () = tokio::time::sleep(waiter.ttl) => Settlement::Timeout,
        };

        // One settlement per elicit, whichever path won the race.
        if waiter.settled.swap(true, Ordering::SeqCst) {
            return Err(ServerError::public(
                "ELICIT_CANCELLED",
                "elicitation already settled",
                None,
            ));
        }

        self.local
            .remove_if(&waiter.session_id, |_, p| p.elicit_id == waiter.elicit_id);
        if let Err(err) = self.store.delete_pending(&waiter.session_id).await {
            tracing::warn!(session = %waiter.session_id, error = %err, "pending cleanup failed");
        }

        match settlement {
            Settlement::Result(params) => {
                Ok(normalize_result(params, waiter.requested_schema.as_ref()))
            }
            Settlement::Timeout => {
                self.metrics.record_elicitation_timeout();
                Err(ServerError::ElicitationTimeout {
                    elicit_id: waiter.elicit_id,
                    ttl: waiter.ttl,
                })
            }
            Settlement::Cancelled(cause) => {
                Err(ServerError::public("ELICIT_CANCELLED", cause, None))
            }
        }
    }

    /// Route a client's `elicitation/result` envelope to the waiter,
    /// wherever it runs.
    pub async fn deliver_result(
        &self,
        session_id: &str,
        params: ElicitResultParams,
    ) -> ServerResult<()> {
        let pending = self
            .store
            .get_pending(session_id)
            .await
            .map_err(|e| ServerError::store(e.to_string()))?;
        let Some(pending) = pending else {
            return Err(ServerError::public(
                "NO_PENDING_ELICIT",
                "no pending elicitation for this session",
                Some(404),
            ));
        };
        if pending.elicit_id != params.elicit_id {
            return Err(ServerError::public(
                "ELICIT_MISMATCH",
                "result does not match the pending elicitation",
                Some(409),
            ));
        }

        let elicit_id = params.elicit_id.clone();
        self.store
            .publish_result(&elicit_id, params, session_id)
            .await
            .map_err(|e| ServerError::store(e.to_string()))?;
        Ok(())
    }

    /// Cancel any pending elicit for a session (adapter destroy).
    pub async fn cancel_session(&self, session_id: &str, cause: &str) {
        if let Some((_, prior)) = self.local.remove(session_id) {
            let _ = prior.cancel_tx.send(cause.to_string());
        }
        if let Err(err) = self.store.delete_pending(session_id).await {
            tracing::warn!(session = %session_id, error = %err, "pending cleanup failed");
        }
        self.session_locks.remove(session_id);
    }

    fn cancel_local(&self, session_id: &str, elicit_id: &str, cause: &str) {
        let removed = self
            .local
            .remove_if(session_id, |_, p| p.elicit_id == elicit_id);
        if let Some((_, prior)) = removed {
            let _ = prior.cancel_tx.send(cause.to_string());
        }
    }

    /// Whether the session has a local waiter (test/diagnostic hook).
    pub fn has_local_pending(&self, session_id: &str) -> bool {
        self.local.contains_key(session_id)
    }
}
