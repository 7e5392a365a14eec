//! Elicitation end to end through the local transport: a tool suspends
//! on user input, the client answers on the same channel, the result is
//! normalized, and timeouts reject exactly once.

use crossmcp_core::error::{CoreError, CoreResult};
use crossmcp_core::tool::{ToolExecutor, ToolInvocation, ToolRecord};
use crossmcp_protocol::ElicitAction;
use crossmcp_protocol::methods;
use crossmcp_server::{
    ElicitOptions, Gateway, OutboundFrame, SessionElicitor, elicitor_token,
};
use bytes::Bytes;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Tool that asks the user to confirm before acting.
struct ConfirmAction;

#[async_trait::async_trait]
impl ToolExecutor for ConfirmAction {
    async fn execute(&self, invocation: &ToolInvocation) -> CoreResult<Value> {
        let elicitor: Arc<Arc<dyn SessionElicitor>> = invocation
            .providers
            .resolve(&elicitor_token())
            .map_err(|e| CoreError::execution(e.to_string()))?;

        let result = elicitor
            .elicit(
                &invocation.request_id,
                "Confirm the action?",
                Some(json!({
                    "type": "object",
                    "properties": { "confirmed": { "type": "boolean" } },
                    "required": ["confirmed"],
                })),
                ElicitOptions::default(),
            )
            .await
            .map_err(|e| CoreError::execution(format!("elicitation failed: {e}")))?;

        let confirmed = result.action == ElicitAction::Accept
            && result.content.as_ref().and_then(|c| c["confirmed"].as_bool()) == Some(true);
        if confirmed {
            Ok(json!("confirmed and executed"))
        } else {
            Ok(json!("not confirmed"))
        }
    }
}

/// Tool that asks for free-text input; empty input reads as a decline.
struct GetUserInput;

#[async_trait::async_trait]
impl ToolExecutor for GetUserInput {
    async fn execute(&self, invocation: &ToolInvocation) -> CoreResult<Value> {
        let elicitor: Arc<Arc<dyn SessionElicitor>> = invocation
            .providers
            .resolve(&elicitor_token())
            .map_err(|e| CoreError::execution(e.to_string()))?;

        let result = elicitor
            .elicit(
                &invocation.request_id,
                "What should I use?",
                Some(json!({
                    "type": "object",
                    "properties": { "userInput": { "type": "string" } },
                    "required": ["userInput"],
                })),
                ElicitOptions::default(),
            )
            .await
            .map_err(|e| CoreError::execution(format!("elicitation failed: {e}")))?;

        match result.action {
            ElicitAction::Accept => Ok(json!(format!(
                "got: {}",
                result.content.unwrap_or_default()["userInput"]
                    .as_str()
                    .unwrap_or_default()
            ))),
            _ => Ok(json!("declined to provide input")),
        }
    }
}

fn elicit_gateway() -> Gateway {
    let gateway = Gateway::builder()
        .name("elicit-test")
        .tool(ToolRecord::new(
            "confirm-action",
            json!({"type": "object"}),
            Arc::new(ConfirmAction),
        ))
        .tool(ToolRecord::new(
            "get-user-input",
            json!({"type": "object"}),
            Arc::new(GetUserInput),
        ))
        .build()
        .unwrap();
    gateway
}

/// Answer the first `elicitation/create` frame on `rx` with `action` and
/// `content`, counting handled requests.
fn spawn_client(
    adapter: Arc<crossmcp_server::TransportAdapter>,
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    action: &'static str,
    content: Value,
    handled: Arc<std::sync::atomic::AtomicUsize>,
) {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let OutboundFrame::Request(request) = frame else {
                continue;
            };
            if request.method != methods::ELICITATION_CREATE {
                continue;
            }
            let elicit_id = request.params.as_ref().unwrap()["elicitId"]
                .as_str()
                .unwrap()
                .to_string();

            let envelope = json!({
                "jsonrpc": "2.0",
                "method": methods::ELICITATION_RESULT,
                "params": {
                    "elicitId": elicit_id,
                    "action": action,
                    "content": content,
                }
            });
            adapter
                .handle_request(http::Method::POST, Bytes::from(envelope.to_string()))
                .await
                .unwrap();
            handled.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    });
}

async fn call_tool_over_local(
    adapter: &Arc<crossmcp_server::TransportAdapter>,
    tool: &str,
) -> Value {
    let body = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": methods::TOOLS_CALL,
        "params": { "name": tool, "arguments": {} },
    });
    let outcome = adapter
        .handle_request(http::Method::POST, Bytes::from(body.to_string()))
        .await
        .unwrap();
    match outcome {
        crossmcp_server::RequestOutcome::Single(response) => {
            response.result().cloned().unwrap_or(Value::Null)
        }
        other => panic!("expected a single response, got {other:?}"),
    }
}

#[tokio::test]
async fn elicit_accept_round_trip() {
    let gateway = elicit_gateway();
    gateway.start().await.unwrap();

    let (adapter, rx) = gateway.connect_local("tok").await.unwrap();
    let handled = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    spawn_client(
        Arc::clone(&adapter),
        rx,
        "accept",
        json!({"confirmed": true}),
        Arc::clone(&handled),
    );

    let result = call_tool_over_local(&adapter, "confirm-action").await;
    assert_eq!(result["content"][0]["text"], "confirmed and executed");

    // The handler fired exactly once and no pending elicit remains.
    assert_eq!(handled.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(!gateway.shared().elicits.has_local_pending(&adapter.key().session_id));
    assert_eq!(gateway.metrics().elicitations_started, 1);
    assert_eq!(gateway.metrics().elicitations_timed_out, 0);
}

#[tokio::test]
async fn elicit_empty_required_input_is_a_decline() {
    let gateway = elicit_gateway();
    gateway.start().await.unwrap();

    let (adapter, rx) = gateway.connect_local("tok").await.unwrap();
    let handled = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    spawn_client(
        Arc::clone(&adapter),
        rx,
        "accept",
        json!({"userInput": ""}),
        Arc::clone(&handled),
    );

    let result = call_tool_over_local(&adapter, "get-user-input").await;
    assert_eq!(result["content"][0]["text"], "declined to provide input");
}

#[tokio::test]
async fn elicit_explicit_decline() {
    let gateway = elicit_gateway();
    gateway.start().await.unwrap();

    let (adapter, rx) = gateway.connect_local("tok").await.unwrap();
    spawn_client(
        Arc::clone(&adapter),
        rx,
        "decline",
        Value::Null,
        Arc::new(std::sync::atomic::AtomicUsize::new(0)),
    );

    let result = call_tool_over_local(&adapter, "confirm-action").await;
    assert_eq!(result["content"][0]["text"], "not confirmed");
}

#[tokio::test(start_paused = true)]
async fn elicit_timeout_rejects_exactly_once() {
    let gateway = elicit_gateway();
    gateway.start().await.unwrap();

    // No client task: nobody ever answers.
    let (adapter, _rx) = gateway.connect_local("tok").await.unwrap();

    let result = call_tool_over_local(&adapter, "confirm-action").await;
    assert_eq!(result["isError"], true);
    let text = result["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("timed out"), "unexpected message: {text}");

    assert_eq!(gateway.metrics().elicitations_timed_out, 1);
    assert!(!gateway.shared().elicits.has_local_pending(&adapter.key().session_id));
}
