//! Ambient request context.
//!
//! A task-local binding carries `{session_id, scope_id, request_id,
//! principal, trace_id}` through the call graph so hooks, tool code, and
//! log lines can consult them without explicit plumbing. Explicit
//! propagation (cloning the context into a spawned task and re-entering
//! it) is the fallback where task-locals do not reach.

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Verified caller identity attached to each request.
///
/// Authentication happens upstream; the gateway only consumes the result.
#[derive(Debug, Clone, Default)]
pub struct Principal {
    /// Stable subject identifier
    pub subject: String,
    /// Verified claims
    pub claims: HashMap<String, Value>,
    /// Granted scopes
    pub scopes: Vec<String>,
}

impl Principal {
    /// Principal with just a subject.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    /// Whether the principal holds a scope.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Values the ambient context carries.
#[derive(Debug, Clone)]
pub struct RequestScope {
    /// Session the request belongs to
    pub session_id: String,
    /// Scope (server/app) the request is dispatched under
    pub scope_id: String,
    /// Request id, unique per inbound request
    pub request_id: String,
    /// Verified principal, absent for anonymous transports
    pub principal: Option<Arc<Principal>>,
    /// Trace id for log and metric correlation
    pub trace_id: String,
}

impl RequestScope {
    /// Context for a request, minting a trace id.
    pub fn new(
        session_id: impl Into<String>,
        scope_id: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            scope_id: scope_id.into(),
            request_id: request_id.into(),
            principal: None,
            trace_id: Uuid::new_v4().to_string(),
        }
    }

    /// Attach the verified principal.
    pub fn with_principal(mut self, principal: Arc<Principal>) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Carry an upstream trace id instead of minting one.
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    /// Run a future with this context bound as the ambient context.
    pub async fn enter<F: Future>(self, fut: F) -> F::Output {
        CURRENT.scope(self, fut).await
    }

    /// The ambient context of the running task, if inside `enter`.
    pub fn current() -> Option<RequestScope> {
        CURRENT.try_with(Clone::clone).ok()
    }
}

tokio::task_local! {
    static CURRENT: RequestScope;
}
