//! MCP request dispatch: envelope to flow to JSON-RPC response.
//!
//! The dispatcher owns the fixed method-to-flow table, opens the ambient
//! request context around each flow run, and converts flow outcomes -
//! values, control signals, failures - into wire responses.

use crate::error::{ServerError, ServerResult};
use crate::shared::GatewayShared;
use crate::transport::TransportProtocol;
use crossmcp_core::context::{Principal, RequestScope};
use crossmcp_core::controlflow::ControlSignal;
use crossmcp_flow::{FlowCtx, FlowEngine, FlowError, HookRegistry};
use crossmcp_protocol::jsonrpc::{JsonRpcRequest, JsonRpcResponse, RequestId};
use crossmcp_protocol::methods;
use crossmcp_protocol::types::CallToolResult;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Upper bound on concurrently dispatched batch items.
const MAX_BATCH_CONCURRENCY: usize = 16;

/// The adapter-side elicit out-path, resolvable by in-flight tools.
///
/// Injected into the request-scoped provider view under
/// [`elicitor_token`] so a tool can suspend on user input without
/// holding a transport reference.
#[async_trait::async_trait]
pub trait SessionElicitor: Send + Sync {
    /// Ask this session's client and await the (normalized) answer.
    async fn elicit(
        &self,
        related_request_id: &str,
        message: &str,
        requested_schema: Option<Value>,
        opts: crate::elicit::ElicitOptions,
    ) -> crate::error::ServerResult<crossmcp_protocol::ElicitResult>;
}

/// Token the session elicitor binds to in the request view.
pub fn elicitor_token() -> crossmcp_core::token::Token {
    crossmcp_core::token::Token::named("session:elicitor")
}

/// Per-request session identity handed in by the adapter.
#[derive(Clone)]
pub struct SessionContext {
    /// Owning session id
    pub session_id: String,
    /// Protocol the session speaks
    pub protocol: TransportProtocol,
    /// Verified principal, absent on anonymous transports
    pub principal: Option<Arc<Principal>>,
    /// Elicit out-path bound to the session's adapter
    pub elicitor: Option<Arc<dyn SessionElicitor>>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("session_id", &self.session_id)
            .field("protocol", &self.protocol)
            .field("authenticated", &self.principal.is_some())
            .finish()
    }
}

/// Routes validated requests into flows.
pub struct McpDispatcher {
    shared: Arc<GatewayShared>,
}

impl fmt::Debug for McpDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpDispatcher")
            .field("flows", &self.shared.flows.len())
            .finish()
    }
}

impl McpDispatcher {
    /// Dispatcher over the gateway's shared state.
    pub fn new(shared: Arc<GatewayShared>) -> Arc<Self> {
        Arc::new(Self { shared })
    }

    /// The shared state flows resolve against.
    pub fn shared(&self) -> &Arc<GatewayShared> {
        &self.shared
    }

    /// Dispatch one request to its flow and shape the response.
    pub async fn dispatch(
        &self,
        request: JsonRpcRequest,
        session: &SessionContext,
    ) -> JsonRpcResponse {
        let method = request.method;
        let id = request.id;

        let Some(flow_name) = methods::flow_for_method(&method) else {
            self.shared.metrics.record_request(true);
            return JsonRpcResponse::error_response(
                ServerError::method_not_found(&method).to_json_rpc_error(),
                id,
            );
        };

        let params = request.params.unwrap_or(Value::Null);
        let request_id = id.as_correlation_key();

        match self.run_flow(flow_name, params, session, &request_id).await {
            Ok(output) => {
                self.shared.metrics.record_request(false);
                JsonRpcResponse::success(output, id)
            }
            Err(err) => {
                self.shared.metrics.record_request(true);
                error_to_response(&method, &err, id)
            }
        }
    }

    /// Dispatch a batch with bounded concurrency.
    pub async fn dispatch_batch(
        &self,
        requests: Vec<JsonRpcRequest>,
        session: &SessionContext,
    ) -> Vec<JsonRpcResponse> {
        stream::iter(requests)
            .map(|request| self.dispatch(request, session))
            .buffer_unordered(MAX_BATCH_CONCURRENCY)
            .collect()
            .await
    }

    /// Run a flow inside a fresh ambient request context.
    ///
    /// Provider views are materialized once here and stay stable for the
    /// whole invocation.
    pub async fn run_flow(
        &self,
        flow_name: &str,
        input: Value,
        session: &SessionContext,
        request_id: &str,
    ) -> ServerResult<Value> {
        let Some(flow) = self.shared.flows.find_by_name(flow_name) else {
            return Err(ServerError::CapabilityUnavailable {
                capability: flow_name.to_string(),
            });
        };

        let views = self.shared.container.build_views(&session.session_id);
        let ctx = FlowCtx::new(
            flow_name,
            input,
            views,
            &session.session_id,
            request_id,
            session.principal.clone(),
        );
        ctx.state().insert(Arc::clone(&self.shared));
        ctx.state().insert(Arc::new(session.clone()));

        let scope_id = self.shared.arena.qualified_id(self.shared.root);
        let mut ambient = RequestScope::new(&session.session_id, scope_id, request_id);
        if let Some(principal) = &session.principal {
            ambient = ambient.with_principal(Arc::clone(principal));
        }

        let hook_registries = self.hook_chain();
        let flow_record = Arc::clone(&flow.item);
        // Every log line under this flow is tagged with the ambient ids.
        let span = tracing::debug_span!(
            "flow",
            flow = %flow_name,
            session = %session.session_id,
            request = %request_id,
            trace = %ambient.trace_id,
        );
        let outcome = tracing::Instrument::instrument(
            ambient.enter(async move { FlowEngine::run(&flow_record, &hook_registries, ctx).await }),
            span,
        )
        .await;

        match outcome {
            Ok(value) => Ok(value),
            Err(FlowError::Interrupt(signal)) => Err(signal_to_error(signal)),
            Err(FlowError::Failure(err)) => match err.downcast::<ServerError>() {
                Ok(server_err) => Err(server_err),
                Err(other) => Err(ServerError::internal(other.to_string())),
            },
        }
    }

    /// Hook registries in consultation order: each scope's own hooks
    /// (parents before children), then process-wide hooks.
    fn hook_chain(&self) -> Vec<Arc<HookRegistry>> {
        let mut chain = Vec::new();
        for scope in self.shared.arena.scopes() {
            if let Some(scope_hooks) = scope.extensions().get::<HookRegistry>() {
                chain.push(scope_hooks);
            }
        }
        chain.push(Arc::clone(&self.shared.hooks));
        chain
    }
}

/// Convert an escaped control signal into the error taxonomy.
fn signal_to_error(signal: ControlSignal) -> ServerError {
    match signal {
        // The engine resolves `Respond` to a value; one escaping here is
        // an engine bug.
        ControlSignal::Respond(_) => ServerError::internal("unresolved respond signal"),
        ControlSignal::Abort {
            code,
            message,
            status,
            data,
        } => match code.as_str() {
            "INVALID_INPUT" => ServerError::invalid_input(message),
            "TOOL_NOT_ACTIVATED" => ServerError::ToolNotActivated {
                tool: data
                    .as_ref()
                    .and_then(|d| d.get("tool"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            },
            "TOOL_NOT_ALLOWED" => ServerError::ToolNotAllowed { message },
            "APPROVAL_REQUIRED" => ServerError::ApprovalRequired {
                approval_url: data
                    .as_ref()
                    .and_then(|d| d.get("approval_url"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            "AUTHORIZATION_REQUIRED" => ServerError::AuthorizationRequired {
                auth_url: data
                    .as_ref()
                    .and_then(|d| d.get("auth_url"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            "CAPABILITY_UNAVAILABLE" => ServerError::CapabilityUnavailable {
                capability: message,
            },
            _ => ServerError::Public {
                code,
                message,
                status,
                data,
            },
        },
        ControlSignal::RetryAfter { backoff, cause } => ServerError::Public {
            code: "RETRY_AFTER".to_string(),
            message: cause,
            status: Some(429),
            data: Some(serde_json::json!({
                "retryAfterMs": backoff.as_millis() as u64
            })),
        },
    }
}

/// Shape an error into the wire response for this method.
///
/// Approval, authorization, elicitation-timeout, and tool execution
/// failures on `tools/call` surface as a result with `isError: true`;
/// everything else is a JSON-RPC error.
fn error_to_response(method: &str, err: &ServerError, id: RequestId) -> JsonRpcResponse {
    let as_tool_result = method == methods::TOOLS_CALL
        && (err.is_tool_result_error()
            || matches!(err, ServerError::Public { code, .. } if code == "TOOL_EXECUTION_ERROR"));

    if as_tool_result {
        let rpc = err.to_json_rpc_error();
        let result = CallToolResult::error(rpc.message, rpc.data);
        let value = serde_json::to_value(result).unwrap_or(Value::Null);
        return JsonRpcResponse::success(value, id);
    }

    JsonRpcResponse::error_response(err.to_json_rpc_error(), id)
}
