//! The per-session transport adapter.
//!
//! One adapter per `(protocol, authHash, sessionId)` triple. The adapter
//! owns the outbound channel (a single-consumer send loop preserves send
//! order), the session's pending-elicit slot, and the state machine
//! `Created -> Ready -> Initialized -> Closing -> Destroyed`.

use super::TransportKey;
use crate::dispatch::{McpDispatcher, SessionContext};
use crate::elicit::{ElicitBroker, ElicitOptions};
use crate::error::{ServerError, ServerResult};
use bytes::Bytes;
use crossmcp_core::context::Principal;
use crossmcp_protocol::elicitation::{ElicitCreateParams, ElicitResult, ElicitResultParams};
use crossmcp_protocol::jsonrpc::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcRequestBody, JsonRpcResponse, RequestId,
};
use crossmcp_protocol::methods;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Adapter lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Constructed, channel not yet open
    Created,
    /// Channel open, MCP handshake not yet done
    Ready,
    /// Handshake done (or short-circuited on recreation)
    Initialized,
    /// Graceful shutdown in progress
    Closing,
    /// Terminal
    Destroyed,
}

/// A frame on the adapter's outbound channel.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// Response to a client request
    Response(JsonRpcResponse),
    /// Server-initiated request (elicitation/create)
    Request(JsonRpcRequest),
    /// Server notification
    Notification(JsonRpcNotification),
}

/// Where the send loop writes frames.
///
/// The HTTP front supplies one per connection; tests use [`ChannelSink`].
#[async_trait::async_trait]
pub trait OutboundSink: Send + Sync {
    /// Deliver one frame to the client.
    async fn send(&self, frame: OutboundFrame) -> ServerResult<()>;

    /// Await channel readiness; the protocol handshake hook.
    async fn ready(&self) -> ServerResult<()> {
        Ok(())
    }
}

/// Test/local sink backed by an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl ChannelSink {
    /// Sink plus the receiving end.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl OutboundSink for ChannelSink {
    async fn send(&self, frame: OutboundFrame) -> ServerResult<()> {
        self.tx
            .send(frame)
            .map_err(|_| ServerError::transport("outbound channel closed"))
    }
}

/// What `handle_request` produced.
#[derive(Debug)]
pub enum RequestOutcome {
    /// GET opened (or reattached) the server-to-client event stream
    StreamOpened,
    /// POST carried an elicitation result; no response body
    Accepted,
    /// One JSON-RPC response
    Single(Box<JsonRpcResponse>),
    /// Batch of responses
    Batch(Vec<JsonRpcResponse>),
}

/// The per-session protocol endpoint.
pub struct TransportAdapter {
    key: TransportKey,
    state: parking_lot::RwLock<AdapterState>,
    outbound_tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<OutboundFrame>>>,
    send_task: Mutex<Option<JoinHandle<()>>>,
    sink: Arc<RwLock<Arc<dyn OutboundSink>>>,
    dispatcher: Arc<McpDispatcher>,
    elicits: Arc<ElicitBroker>,
    principal: parking_lot::RwLock<Option<Arc<Principal>>>,
    last_seen: parking_lot::RwLock<Instant>,
    cancel: CancellationToken,
}

impl fmt::Debug for TransportAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportAdapter")
            .field("key", &self.key.to_string())
            .field("state", &self.state())
            .finish()
    }
}

impl TransportAdapter {
    /// Construct an adapter bound to a sink; call [`connect`] before use.
    ///
    /// [`connect`]: TransportAdapter::connect
    pub fn new(
        key: TransportKey,
        sink: Arc<dyn OutboundSink>,
        dispatcher: Arc<McpDispatcher>,
        elicits: Arc<ElicitBroker>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<OutboundFrame>();
        let sink = Arc::new(RwLock::new(sink));
        let adapter = Arc::new(Self {
            key,
            state: parking_lot::RwLock::new(AdapterState::Created),
            outbound_tx: parking_lot::Mutex::new(Some(tx)),
            send_task: Mutex::new(None),
            sink: Arc::clone(&sink),
            dispatcher,
            elicits,
            principal: parking_lot::RwLock::new(None),
            last_seen: parking_lot::RwLock::new(Instant::now()),
            cancel: CancellationToken::new(),
        });
        adapter.spawn_send_loop(rx);
        adapter
    }

    fn spawn_send_loop(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<OutboundFrame>) {
        let sink = Arc::clone(&self.sink);
        let key = self.key.to_string();
        let handle = tokio::spawn(async move {
            // Single consumer: outbound frames leave in send order.
            while let Some(frame) = rx.recv().await {
                let current = Arc::clone(&*sink.read().await);
                if let Err(err) = current.send(frame).await {
                    tracing::warn!(session = %key, error = %err, "outbound send failed");
                }
            }
        });
        // Lock is uncontended at construction time.
        if let Ok(mut slot) = self.send_task.try_lock() {
            *slot = Some(handle);
        }
    }

    /// The adapter's transport key.
    pub fn key(&self) -> &TransportKey {
        &self.key
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AdapterState {
        *self.state.read()
    }

    /// When the adapter last handled a request.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.read().elapsed()
    }

    /// Token cancelled when the adapter is destroyed; long-running tool
    /// code can watch it for cooperative shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Attach the verified principal for subsequent requests.
    pub fn set_principal(&self, principal: Arc<Principal>) {
        *self.principal.write() = Some(principal);
    }

    /// Open the channel: `Created -> Ready` after the sink handshake.
    pub async fn connect(&self) -> ServerResult<()> {
        self.transition(AdapterState::Created, AdapterState::Ready)?;
        let sink = Arc::clone(&*self.sink.read().await);
        sink.ready().await
    }

    /// Short-circuit the MCP handshake: `Ready -> Initialized`.
    ///
    /// Used during cross-node recreation; the original `initialize`
    /// happened on the node that created the session.
    pub fn mark_as_initialized(&self) -> ServerResult<()> {
        self.transition(AdapterState::Ready, AdapterState::Initialized)
    }

    fn transition(&self, from: AdapterState, to: AdapterState) -> ServerResult<()> {
        let mut state = self.state.write();
        if *state != from {
            return Err(ServerError::transport(format!(
                "invalid adapter transition {:?} -> {to:?} (currently {:?})",
                from, *state
            )));
        }
        *state = to;
        Ok(())
    }

    fn session_context(&self) -> SessionContext {
        SessionContext {
            session_id: self.key.session_id.clone(),
            protocol: self.key.protocol,
            principal: self.principal.read().clone(),
            elicitor: None,
        }
    }

    fn session_context_with_elicitor(self: &Arc<Self>) -> SessionContext {
        SessionContext {
            elicitor: Some(Arc::clone(self) as Arc<dyn crate::dispatch::SessionElicitor>),
            ..self.session_context()
        }
    }

    /// Handle one HTTP exchange for this session.
    ///
    /// GET opens (or reattaches) the event stream. POST either resolves
    /// the pending elicit - recognized by the `elicitation/result` method
    /// envelope - or dispatches MCP request(s).
    pub async fn handle_request(
        self: &Arc<Self>,
        method: http::Method,
        body: Bytes,
    ) -> ServerResult<RequestOutcome> {
        if matches!(self.state(), AdapterState::Closing | AdapterState::Destroyed) {
            return Err(ServerError::InvalidSession {
                session_id: self.key.session_id.clone(),
            });
        }
        *self.last_seen.write() = Instant::now();

        if method == http::Method::GET {
            Ok(RequestOutcome::StreamOpened)
        } else if method == http::Method::POST {
            self.handle_post(body).await
        } else {
            Err(ServerError::invalid_request(format!(
                "unsupported method {method}"
            )))
        }
    }

    async fn handle_post(self: &Arc<Self>, body: Bytes) -> ServerResult<RequestOutcome> {
        let parsed: Value = serde_json::from_slice(&body)
            .map_err(|e| ServerError::invalid_request(format!("malformed JSON body: {e}")))?;

        if parsed.get("method").and_then(Value::as_str) == Some(methods::ELICITATION_RESULT) {
            let params: ElicitResultParams =
                serde_json::from_value(parsed.get("params").cloned().unwrap_or(Value::Null))
                    .map_err(|e| {
                        ServerError::invalid_request(format!("malformed elicitation result: {e}"))
                    })?;
            self.elicits
                .deliver_result(&self.key.session_id, params)
                .await?;
            return Ok(RequestOutcome::Accepted);
        }

        let body: JsonRpcRequestBody = serde_json::from_value(parsed)
            .map_err(|e| ServerError::invalid_request(format!("malformed JSON-RPC body: {e}")))?;
        let session = self.session_context_with_elicitor();

        match body {
            JsonRpcRequestBody::Single(request) => {
                let is_initialize = request.method == methods::INITIALIZE;
                let response = self.dispatcher.dispatch(request, &session).await;
                if is_initialize && !response.is_error() {
                    // First successful initialize completes the handshake.
                    let _ = self.transition(AdapterState::Ready, AdapterState::Initialized);
                }
                Ok(RequestOutcome::Single(Box::new(response)))
            }
            JsonRpcRequestBody::Batch(requests) => {
                let responses = self.dispatcher.dispatch_batch(requests, &session).await;
                Ok(RequestOutcome::Batch(responses))
            }
        }
    }

    /// Replace the outbound sink (stream reconnect).
    pub async fn attach_sink(&self, sink: Arc<dyn OutboundSink>) {
        *self.sink.write().await = sink;
    }

    /// Queue a frame; delivery order follows call order.
    pub fn send(&self, frame: OutboundFrame) -> ServerResult<()> {
        let guard = self.outbound_tx.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| ServerError::transport("adapter is shutting down"))?;
        tx.send(frame)
            .map_err(|_| ServerError::transport("send loop stopped"))
    }

    /// Issue an elicitation to this session's client and await the
    /// result.
    ///
    /// Runs the `elicitation:request` flow (validation, id allocation,
    /// expiry, pending persistence), sends `elicitation/create` on this
    /// adapter's channel keyed by `related_request_id`, and settles
    /// exactly once on result, TTL expiry, or cancellation.
    pub async fn send_elicit_request(
        &self,
        related_request_id: &str,
        message: &str,
        requested_schema: Option<Value>,
        opts: ElicitOptions,
    ) -> ServerResult<ElicitResult> {
        let session = self.session_context();
        let input = serde_json::json!({
            "mode": opts.mode,
            "message": message,
            "requestedSchema": requested_schema,
            "url": opts.url,
            "relatedRequestId": related_request_id,
            "ttlMs": opts.ttl.map(|t| t.as_millis() as u64),
        });

        let built = self
            .dispatcher
            .run_flow(methods::FLOW_ELICITATION_REQUEST, input, &session, related_request_id)
            .await?;
        let params: ElicitCreateParams = serde_json::from_value(built)?;

        let waiter = self.elicits.prepare(&self.key.session_id, &params).await?;

        self.send(OutboundFrame::Request(JsonRpcRequest::with_params(
            methods::ELICITATION_CREATE,
            &params,
            RequestId::from(related_request_id),
        )?))?;

        self.elicits.await_result(waiter).await
    }

    /// Graceful shutdown: drain the send loop within `graceful`, then
    /// force-close. Cancels any pending elicit.
    pub async fn destroy(&self, graceful: Duration) -> ServerResult<()> {
        {
            let mut state = self.state.write();
            if matches!(*state, AdapterState::Destroyed) {
                return Ok(());
            }
            *state = AdapterState::Closing;
        }

        self.elicits
            .cancel_session(&self.key.session_id, "adapter destroyed")
            .await;

        // Dropping the sender lets the loop drain remaining frames.
        self.outbound_tx.lock().take();
        if let Some(handle) = self.send_task.lock().await.take() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(graceful, handle).await.is_err() {
                abort.abort();
                tracing::warn!(session = %self.key, "send loop exceeded graceful window; aborted");
            }
        }

        self.cancel.cancel();
        *self.state.write() = AdapterState::Destroyed;
        Ok(())
    }
}

#[async_trait::async_trait]
impl crate::dispatch::SessionElicitor for TransportAdapter {
    async fn elicit(
        &self,
        related_request_id: &str,
        message: &str,
        requested_schema: Option<Value>,
        opts: ElicitOptions,
    ) -> ServerResult<ElicitResult> {
        self.send_elicit_request(related_request_id, message, requested_schema, opts)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_delivers() {
        let (sink, mut rx) = ChannelSink::new();
        let frame = OutboundFrame::Notification(JsonRpcNotification::new("notifications/test", None));
        tokio_test::block_on(async move {
            sink.send(frame).await.unwrap();
            assert!(matches!(
                rx.recv().await,
                Some(OutboundFrame::Notification(_))
            ));
        });
    }
}
