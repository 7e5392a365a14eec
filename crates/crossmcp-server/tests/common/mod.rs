//! Shared fixtures for the gateway integration tests.
#![allow(dead_code)]

use crossmcp_core::error::CoreResult;
use crossmcp_core::tool::{ToolExecutor, ToolInvocation, ToolRecord};
use crossmcp_protocol::jsonrpc::{JsonRpcRequest, JsonRpcResponse, RequestId};
use crossmcp_server::{Gateway, SessionContext, TransportProtocol};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A session context for dispatcher-level tests.
pub fn session(id: &str) -> SessionContext {
    SessionContext {
        session_id: id.to_string(),
        protocol: TransportProtocol::Local,
        principal: None,
        elicitor: None,
    }
}

/// Dispatch one request and return the response.
pub async fn dispatch(
    gateway: &Gateway,
    session: &SessionContext,
    method: &str,
    params: Value,
) -> JsonRpcResponse {
    let request = JsonRpcRequest::new(method, Some(params), RequestId::from(1));
    gateway.dispatcher().dispatch(request, session).await
}

/// Executor that counts its invocations and adds two numbers.
pub struct CountingAdd {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl ToolExecutor for CountingAdd {
    async fn execute(&self, invocation: &ToolInvocation) -> CoreResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let input = invocation.input();
        let a = input["a"].as_f64().unwrap_or(0.0);
        let b = input["b"].as_f64().unwrap_or(0.0);
        Ok(json!(a + b))
    }
}

/// The `add` tool record, optionally cached.
pub fn add_tool(calls: Arc<AtomicUsize>, cached: bool) -> ToolRecord {
    let record = ToolRecord::new(
        "add",
        json!({
            "type": "object",
            "properties": {
                "a": { "type": "number" },
                "b": { "type": "number" }
            },
            "required": ["a", "b"],
        }),
        Arc::new(CountingAdd { calls }),
    )
    .with_output(json!("number"));

    if cached {
        record.with_cache(std::time::Duration::from_secs(60))
    } else {
        record
    }
}
