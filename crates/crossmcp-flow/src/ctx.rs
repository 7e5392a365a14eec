//! The typed context handed to every stage and hook.

use crossmcp_core::context::Principal;
use crossmcp_core::extensions::Extensions;
use crossmcp_core::provider::ProviderViews;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Shared, clonable context for one flow invocation.
///
/// Hooks see a single-threaded invocation: stages and hooks run
/// sequentially, so reads observe every earlier write.
#[derive(Clone)]
pub struct FlowCtx {
    inner: Arc<FlowCtxInner>,
}

struct FlowCtxInner {
    flow_name: String,
    input: RwLock<Value>,
    output: RwLock<Option<Value>>,
    data: RwLock<HashMap<String, Value>>,
    state: Extensions,
    providers: ProviderViews,
    session_id: String,
    request_id: String,
    principal: Option<Arc<Principal>>,
}

impl fmt::Debug for FlowCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowCtx")
            .field("flow", &self.inner.flow_name)
            .field("session_id", &self.inner.session_id)
            .field("request_id", &self.inner.request_id)
            .finish()
    }
}

impl FlowCtx {
    /// Context for one invocation.
    pub fn new(
        flow_name: impl Into<String>,
        input: Value,
        providers: ProviderViews,
        session_id: impl Into<String>,
        request_id: impl Into<String>,
        principal: Option<Arc<Principal>>,
    ) -> Self {
        Self {
            inner: Arc::new(FlowCtxInner {
                flow_name: flow_name.into(),
                input: RwLock::new(input),
                output: RwLock::new(None),
                data: RwLock::new(HashMap::new()),
                state: Extensions::new(),
                providers,
                session_id: session_id.into(),
                request_id: request_id.into(),
                principal,
            }),
        }
    }

    /// Flow being executed.
    pub fn flow_name(&self) -> &str {
        &self.inner.flow_name
    }

    /// Session id of the invocation.
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Request id of the invocation.
    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    /// Verified principal, if the transport authenticated one.
    pub fn principal(&self) -> Option<Arc<Principal>> {
        self.inner.principal.clone()
    }

    /// Provider views, materialized once and stable for the invocation.
    pub fn providers(&self) -> &ProviderViews {
        &self.inner.providers
    }

    /// Parsed input.
    pub fn input(&self) -> Value {
        self.inner.input.read().clone()
    }

    /// Rewrite the input; resolve-input stages use this.
    pub fn set_input(&self, input: Value) {
        *self.inner.input.write() = input;
    }

    /// Output, once produced.
    pub fn output(&self) -> Option<Value> {
        self.inner.output.read().clone()
    }

    /// Set the output.
    pub fn set_output(&self, output: Value) {
        *self.inner.output.write() = Some(output);
    }

    /// Read a scratch entry shared between hooks.
    pub fn data(&self, key: &str) -> Option<Value> {
        self.inner.data.read().get(key).cloned()
    }

    /// Write a scratch entry.
    pub fn set_data(&self, key: impl Into<String>, value: Value) {
        self.inner.data.write().insert(key.into(), value);
    }

    /// Whether a scratch entry is set to `true`.
    pub fn data_flag(&self, key: &str) -> bool {
        self.inner
            .data
            .read()
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Typed state populated by earlier stages.
    pub fn state(&self) -> &Extensions {
        &self.inner.state
    }
}
