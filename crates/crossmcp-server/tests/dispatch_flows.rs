//! Dispatch-level coverage of the built-in flows: initialize, resources,
//! prompts, logging, skills, completion, and batch handling.

mod common;

use common::{dispatch, session};
use crossmcp_core::error::{CoreError, CoreResult};
use crossmcp_core::prompt::{PromptRecord, PromptRenderer};
use crossmcp_core::resource::{ResourceReader, ResourceRecord};
use crossmcp_core::skills::StaticSkillRegistry;
use crossmcp_protocol::jsonrpc::{JsonRpcRequest, RequestId};
use crossmcp_protocol::methods;
use crossmcp_protocol::types::{
    Content, GetPromptResult, LogLevel, Prompt, PromptArgument, PromptMessage, Resource,
    ResourceContents, Role, Skill,
};
use crossmcp_server::{Gateway, OutboundFrame};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

struct NotesReader;

#[async_trait::async_trait]
impl ResourceReader for NotesReader {
    async fn read(&self, uri: &str) -> CoreResult<Vec<ResourceContents>> {
        if uri != "notes://today" {
            return Err(CoreError::not_found("resource", uri));
        }
        Ok(vec![ResourceContents {
            uri: uri.to_string(),
            mime_type: Some("text/plain".to_string()),
            text: Some("ship the gateway".to_string()),
            blob: None,
        }])
    }
}

struct GreetingRenderer;

#[async_trait::async_trait]
impl PromptRenderer for GreetingRenderer {
    async fn render(&self, arguments: HashMap<String, String>) -> CoreResult<GetPromptResult> {
        let name = arguments.get("name").cloned().unwrap_or_default();
        Ok(GetPromptResult {
            description: None,
            messages: vec![PromptMessage {
                role: Role::User,
                content: Content::text(format!("Greet {name} warmly.")),
            }],
        })
    }
}

fn full_gateway() -> Gateway {
    Gateway::builder()
        .name("flows-test")
        .version("9.9.9")
        .instructions("use the tools sparingly")
        .resource(ResourceRecord::new(
            Resource {
                uri: "notes://today".to_string(),
                name: "today".to_string(),
                description: None,
                mime_type: Some("text/plain".to_string()),
            },
            Arc::new(NotesReader),
        ))
        .prompt(PromptRecord::new(
            Prompt {
                name: "greeting".to_string(),
                description: None,
                arguments: Some(vec![PromptArgument {
                    name: "name".to_string(),
                    description: None,
                    required: Some(true),
                }]),
            },
            Arc::new(GreetingRenderer),
        ))
        .skills(Arc::new(StaticSkillRegistry::new(vec![Skill {
            id: "notes".to_string(),
            name: "notes".to_string(),
            description: Some("working with notes".to_string()),
            tools: vec![],
        }])))
        .build()
        .unwrap()
}

#[tokio::test]
async fn initialize_reports_server_info_and_capabilities() {
    let gateway = full_gateway();
    gateway.start().await.unwrap();

    let response = dispatch(
        &gateway,
        &session("s1"),
        methods::INITIALIZE,
        json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": {"name": "test-client", "version": "0.1.0"},
        }),
    )
    .await;

    let result = response.result().unwrap();
    assert_eq!(result["serverInfo"]["name"], "flows-test");
    assert_eq!(result["serverInfo"]["version"], "9.9.9");
    assert_eq!(result["instructions"], "use the tools sparingly");
    assert!(result["capabilities"]["resources"]["subscribe"].as_bool().unwrap());
    assert!(result["capabilities"].get("skills").is_some());
}

#[tokio::test]
async fn ping_answers_with_an_empty_object() {
    let gateway = full_gateway();
    gateway.start().await.unwrap();

    let response = dispatch(&gateway, &session("s1"), methods::PING, json!({})).await;
    assert_eq!(*response.result().unwrap(), json!({}));
}

#[tokio::test]
async fn read_resource_round_trip() {
    let gateway = full_gateway();
    gateway.start().await.unwrap();

    let response = dispatch(
        &gateway,
        &session("s1"),
        methods::RESOURCES_READ,
        json!({"uri": "notes://today"}),
    )
    .await;
    let contents = &response.result().unwrap()["contents"][0];
    assert_eq!(contents["text"], "ship the gateway");

    let missing = dispatch(
        &gateway,
        &session("s1"),
        methods::RESOURCES_READ,
        json!({"uri": "notes://missing"}),
    )
    .await;
    assert!(missing.is_error());
}

#[tokio::test]
async fn resource_subscriptions_are_idempotent_and_notify() {
    let gateway = full_gateway();
    gateway.start().await.unwrap();

    let (adapter, mut rx) = gateway.connect_local("tok").await.unwrap();
    let sess = session(&adapter.key().session_id);

    // Double-subscribe then a stray unsubscribe for another URI.
    for _ in 0..2 {
        let response = dispatch(
            &gateway,
            &sess,
            methods::RESOURCES_SUBSCRIBE,
            json!({"uri": "notes://today"}),
        )
        .await;
        assert!(!response.is_error());
    }
    dispatch(
        &gateway,
        &sess,
        methods::RESOURCES_UNSUBSCRIBE,
        json!({"uri": "notes://other"}),
    )
    .await;

    // One subscriber, one notification.
    assert_eq!(gateway.publish_resource_update("notes://today"), 1);
    match rx.recv().await {
        Some(OutboundFrame::Notification(note)) => {
            assert_eq!(note.method, methods::RESOURCES_UPDATED_NOTIFICATION);
            assert_eq!(note.params.unwrap()["uri"], "notes://today");
        }
        other => panic!("expected a notification, got {other:?}"),
    }

    // Unsubscribe stops delivery.
    dispatch(
        &gateway,
        &sess,
        methods::RESOURCES_UNSUBSCRIBE,
        json!({"uri": "notes://today"}),
    )
    .await;
    assert_eq!(gateway.publish_resource_update("notes://today"), 0);
}

#[tokio::test]
async fn get_prompt_renders_and_validates_arguments() {
    let gateway = full_gateway();
    gateway.start().await.unwrap();

    let response = dispatch(
        &gateway,
        &session("s1"),
        methods::PROMPTS_GET,
        json!({"name": "greeting", "arguments": {"name": "Ada"}}),
    )
    .await;
    let message = &response.result().unwrap()["messages"][0];
    assert_eq!(message["content"]["text"], "Greet Ada warmly.");

    let missing_arg = dispatch(
        &gateway,
        &session("s1"),
        methods::PROMPTS_GET,
        json!({"name": "greeting"}),
    )
    .await;
    assert_eq!(missing_arg.error().unwrap().code, -32602);
}

#[tokio::test]
async fn set_level_changes_only_that_session() {
    let gateway = full_gateway();
    gateway.start().await.unwrap();

    let response = dispatch(
        &gateway,
        &session("s1"),
        methods::LOGGING_SET_LEVEL,
        json!({"level": "debug"}),
    )
    .await;
    assert!(!response.is_error());

    let levels = &gateway.shared().session_levels;
    assert_eq!(levels.get("s1"), LogLevel::Debug);
    assert_eq!(levels.get("s2"), LogLevel::Info);
}

#[tokio::test]
async fn skills_search_and_list() {
    let gateway = full_gateway();
    gateway.start().await.unwrap();

    let listed = dispatch(&gateway, &session("s1"), methods::SKILLS_LIST, json!({})).await;
    assert_eq!(listed.result().unwrap()["skills"][0]["id"], "notes");

    let found = dispatch(
        &gateway,
        &session("s1"),
        methods::SKILLS_SEARCH,
        json!({"query": "notes"}),
    )
    .await;
    let hits = found.result().unwrap()["skills"].as_array().unwrap().clone();
    assert_eq!(hits.len(), 1);
    assert!(hits[0]["score"].as_f64().unwrap() > 0.0);

    let nothing = dispatch(
        &gateway,
        &session("s1"),
        methods::SKILLS_SEARCH,
        json!({"query": "zzz-no-such"}),
    )
    .await;
    assert!(nothing.result().unwrap()["skills"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn skills_unavailable_without_a_registry() {
    let gateway = Gateway::builder().name("bare").build().unwrap();
    gateway.start().await.unwrap();

    let response = dispatch(&gateway, &session("s1"), methods::SKILLS_LIST, json!({})).await;
    let error = response.error().unwrap();
    assert_eq!(error.code, -32001);
    assert!(error.message.contains("capability unavailable"));
}

#[tokio::test]
async fn completion_answers_with_an_empty_candidate_set() {
    let gateway = full_gateway();
    gateway.start().await.unwrap();

    let response = dispatch(
        &gateway,
        &session("s1"),
        methods::COMPLETION_COMPLETE,
        json!({"ref": {"type": "ref/prompt", "name": "greeting"}, "argument": {"name": "name", "value": "A"}}),
    )
    .await;
    let completion = &response.result().unwrap()["completion"];
    assert!(completion["values"].as_array().unwrap().is_empty());
    assert_eq!(completion["hasMore"], false);
}

#[tokio::test]
async fn batch_dispatch_answers_every_request() {
    let gateway = full_gateway();
    gateway.start().await.unwrap();

    let requests: Vec<JsonRpcRequest> = (0..5)
        .map(|i| {
            JsonRpcRequest::new(methods::PING, Some(json!({})), RequestId::from(i as i64))
        })
        .collect();
    let responses = gateway
        .dispatcher()
        .dispatch_batch(requests, &session("s1"))
        .await;

    assert_eq!(responses.len(), 5);
    assert!(responses.iter().all(|r| !r.is_error()));

    let mut ids: Vec<String> = responses
        .iter()
        .filter_map(|r| r.id.0.as_ref().map(|id| id.as_correlation_key()))
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["0", "1", "2", "3", "4"]);
}

#[tokio::test]
async fn elicitation_request_flow_validates_input() {
    let gateway = full_gateway();
    gateway.start().await.unwrap();

    // Valid form request builds create params with an allocated id.
    let built = gateway
        .dispatcher()
        .run_flow(
            methods::FLOW_ELICITATION_REQUEST,
            json!({"mode": "form", "message": "pick one", "requestedSchema": null}),
            &session("s1"),
            "req-1",
        )
        .await
        .unwrap();
    assert!(built["elicitId"].as_str().unwrap().starts_with("elicit-"));
    assert_eq!(built["message"], "pick one");

    // Empty message is rejected.
    let err = gateway
        .dispatcher()
        .run_flow(
            methods::FLOW_ELICITATION_REQUEST,
            json!({"mode": "form", "message": ""}),
            &session("s1"),
            "req-2",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, crossmcp_server::ServerError::InvalidInput { .. }));

    // URL mode requires a url.
    let err = gateway
        .dispatcher()
        .run_flow(
            methods::FLOW_ELICITATION_REQUEST,
            json!({"mode": "url", "message": "visit"}),
            &session("s1"),
            "req-3",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, crossmcp_server::ServerError::InvalidInput { .. }));
}
