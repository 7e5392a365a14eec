//! The tools/call pipeline end to end: caching, guards, approval,
//! validation, sanitization, and finalize accounting.

mod common;

use common::{add_tool, dispatch, session};
use crossmcp_core::tool::ToolRecord;
use crossmcp_flow::hooks::HookRecord;
use crossmcp_protocol::methods;
use crossmcp_server::Gateway;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::test]
async fn cache_hit_short_circuits_executor_and_write_stage() {
    let calls = Arc::new(AtomicUsize::new(0));
    let write_stage_runs = Arc::new(AtomicUsize::new(0));
    let write_counter = Arc::clone(&write_stage_runs);

    let gateway = Gateway::builder()
        .name("cache-test")
        .tool(add_tool(Arc::clone(&calls), true))
        .hook(HookRecord::will(
            methods::FLOW_CALL_TOOL,
            "writeCache",
            0,
            move |_| {
                let counter = Arc::clone(&write_counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        ))
        .build()
        .unwrap();
    gateway.start().await.unwrap();

    let sess = session("s1");
    let params = json!({"name": "add", "arguments": {"a": 2, "b": 3}});

    let first = dispatch(&gateway, &sess, methods::TOOLS_CALL, params.clone()).await;
    assert!(!first.is_error());
    let first_result = first.result().unwrap().clone();
    assert_eq!(first_result["content"][0]["text"], "5.0");
    assert_eq!(first_result["structuredContent"]["content"], 5.0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(write_stage_runs.load(Ordering::SeqCst), 1);

    // Identical input: served from cache; the executor does not run and
    // the willWriteCache hook never fires.
    let second = dispatch(&gateway, &sess, methods::TOOLS_CALL, params).await;
    assert_eq!(second.result().unwrap().clone(), first_result);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(write_stage_runs.load(Ordering::SeqCst), 1);

    let metrics = gateway.metrics();
    assert_eq!(metrics.cache_hits, 1);
    // finalize ran for both invocations.
    assert_eq!(metrics.tool_invocations, 2);

    // Different input misses the cache.
    let third = dispatch(
        &gateway,
        &sess,
        methods::TOOLS_CALL,
        json!({"name": "add", "arguments": {"a": 1, "b": 1}}),
    )
    .await;
    assert_eq!(third.result().unwrap()["structuredContent"]["content"], 2.0);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn tool_output_is_sanitized() {
    let gateway = Gateway::builder()
        .name("sanitize-test")
        .tool(
            ToolRecord::from_fn("leaky", json!({"type": "object"}), |_| async {
                Ok(json!({
                    "constructor": {"polluted": true},
                    "__proto__": {"polluted": true},
                    "prototype": {"polluted": true},
                    "data": "ok",
                }))
            })
            .with_output(json!({"type": "object"})),
        )
        .build()
        .unwrap();
    gateway.start().await.unwrap();

    let response = dispatch(
        &gateway,
        &session("s1"),
        methods::TOOLS_CALL,
        json!({"name": "leaky", "arguments": {}}),
    )
    .await;

    let structured = &response.result().unwrap()["structuredContent"];
    assert_eq!(*structured, json!({"data": "ok"}));
}

#[tokio::test]
async fn invalid_input_maps_to_invalid_params() {
    let calls = Arc::new(AtomicUsize::new(0));
    let gateway = Gateway::builder()
        .name("validate-test")
        .tool(add_tool(Arc::clone(&calls), false))
        .build()
        .unwrap();
    gateway.start().await.unwrap();

    let response = dispatch(
        &gateway,
        &session("s1"),
        methods::TOOLS_CALL,
        json!({"name": "add", "arguments": {"a": "not-a-number"}}),
    )
    .await;

    assert_eq!(response.error().unwrap().code, -32602);
    assert_eq!(calls.load(Ordering::SeqCst), 0, "executor never ran");
    // finalize still ran exactly once for the failed invocation.
    assert_eq!(gateway.metrics().tool_invocations, 1);
    assert_eq!(gateway.metrics().tool_failures, 1);
}

#[tokio::test]
async fn activation_guard_aborts_with_403_kind() {
    let gateway = Gateway::builder()
        .name("guard-test")
        .tool(
            ToolRecord::from_fn("hidden", json!({"type": "object"}), |_| async {
                Ok(json!("never"))
            })
            .with_activation(|_| false),
        )
        .build()
        .unwrap();
    gateway.start().await.unwrap();

    let response = dispatch(
        &gateway,
        &session("s1"),
        methods::TOOLS_CALL,
        json!({"name": "hidden", "arguments": {}}),
    )
    .await;

    let error = response.error().unwrap();
    assert_eq!(error.code, -32002);
    assert_eq!(error.data.as_ref().unwrap()["kind"], "TOOL_NOT_ACTIVATED");
}

#[tokio::test]
async fn approval_required_surfaces_as_is_error_result() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let gateway = Gateway::builder()
        .name("approval-test")
        .tool(
            ToolRecord::from_fn("dangerous", json!({"type": "object"}), move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("done"))
                }
            })
            .with_approval("https://approvals.example/dangerous"),
        )
        .build()
        .unwrap();
    gateway.start().await.unwrap();

    let response = dispatch(
        &gateway,
        &session("s1"),
        methods::TOOLS_CALL,
        json!({"name": "dangerous", "arguments": {}}),
    )
    .await;

    // Not a JSON-RPC error: a result with isError plus the approval URL.
    assert!(!response.is_error());
    let result = response.result().unwrap();
    assert_eq!(result["isError"], true);
    assert_eq!(
        result["structuredContent"]["approval_url"],
        "https://approvals.example/dangerous"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0, "tool is not retried");
}

#[tokio::test]
async fn skill_gated_tool_requires_loaded_skill() {
    use crossmcp_core::skills::StaticSkillRegistry;
    use crossmcp_protocol::types::Skill;

    let gateway = Gateway::builder()
        .name("gate-test")
        .tool(
            ToolRecord::from_fn("billing-adjust", json!({"type": "object"}), |_| async {
                Ok(json!("adjusted"))
            })
            .with_skill_gate("billing"),
        )
        .skills(Arc::new(StaticSkillRegistry::new(vec![Skill {
            id: "billing".into(),
            name: "billing".into(),
            description: None,
            tools: vec!["billing-adjust".into()],
        }])))
        .build()
        .unwrap();
    gateway.start().await.unwrap();

    let sess = session("s1");
    let call = json!({"name": "billing-adjust", "arguments": {}});

    let refused = dispatch(&gateway, &sess, methods::TOOLS_CALL, call.clone()).await;
    assert_eq!(refused.error().unwrap().code, -32003);

    // Loading the skill unlocks the tool for this session only.
    let loaded = dispatch(
        &gateway,
        &sess,
        methods::SKILLS_LOAD,
        json!({"id": "billing"}),
    )
    .await;
    assert!(!loaded.is_error());
    assert_eq!(loaded.result().unwrap()["isComplete"], true);

    let allowed = dispatch(&gateway, &sess, methods::TOOLS_CALL, call.clone()).await;
    assert_eq!(allowed.result().unwrap()["content"][0]["text"], "adjusted");

    let other = dispatch(&gateway, &session("s2"), methods::TOOLS_CALL, call).await;
    assert_eq!(other.error().unwrap().code, -32003);
}

#[tokio::test]
async fn unknown_method_and_tool() {
    let gateway = Gateway::builder().name("route-test").build().unwrap();
    gateway.start().await.unwrap();

    let response = dispatch(&gateway, &session("s1"), "bogus/method", json!({})).await;
    assert_eq!(response.error().unwrap().code, -32601);

    let response = dispatch(
        &gateway,
        &session("s1"),
        methods::TOOLS_CALL,
        json!({"name": "ghost", "arguments": {}}),
    )
    .await;
    let error = response.error().unwrap();
    assert_eq!(error.code, -32000);
    assert!(error.message.contains("ghost"));
}

#[tokio::test]
async fn tools_list_uses_qualified_names_for_app_tools() {
    use crossmcp_server::AppBuilder;

    let gateway = Gateway::builder()
        .name("list-test")
        .tool(add_tool(Arc::new(AtomicUsize::new(0)), false))
        .app(AppBuilder::new("crm").tool(ToolRecord::from_fn(
            "lookup",
            json!({"type": "object"}),
            |_| async { Ok(json!(null)) },
        )))
        .build()
        .unwrap();
    gateway.start().await.unwrap();

    let response = dispatch(&gateway, &session("s1"), methods::TOOLS_LIST, json!({})).await;
    let tools = response.result().unwrap()["tools"].as_array().unwrap().clone();
    let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    assert!(names.contains(&"add"));
    assert!(names.contains(&"crm.lookup"));
}
