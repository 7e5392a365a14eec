//! Built-in flows for every dispatched MCP method other than
//! `tools/call` (which lives in [`crate::invoke`]).
//!
//! Each flow is an ordinary [`FlowRecord`], so plugins hook these stages
//! exactly like tool-call stages.

use crate::elicit::{ElicitBroker, PendingElicit};
use crate::shared::GatewayShared;
use chrono::Utc;
use crossmcp_core::error::CoreResult;
use crossmcp_core::skills::{SkillListOptions, SkillSearchOptions, resolve_skill_load};
use crossmcp_flow::{FlowCtx, FlowError, FlowRecord, FlowRegistry, FlowResult};
use crossmcp_protocol::elicitation::{ElicitCreateParams, ElicitMode};
use crossmcp_protocol::methods;
use crossmcp_protocol::types::{
    CompleteResult, Completion, EmptyResult, GetPromptRequest, Implementation, InitializeRequest,
    InitializeResult, ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult,
    ListSkillsResult, ListToolsResult, PROTOCOL_VERSION, PromptsCapability, ReadResourceRequest,
    ReadResourceResult, ResourcesCapability, ServerCapabilities, SetLevelRequest,
    SkillLoadRequest, SkillSearchRequest, SkillSearchResult, SubscribeRequest, ToolsCapability,
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// Register every built-in flow, `tools:call-tool` included.
pub fn register_builtin_flows(registry: &FlowRegistry) -> CoreResult<()> {
    registry.insert(crate::invoke::call_tool_flow())?;
    registry.insert(initialize_flow())?;
    registry.insert(ping_flow())?;
    registry.insert(list_tools_flow())?;
    registry.insert(list_resources_flow())?;
    registry.insert(list_resource_templates_flow())?;
    registry.insert(read_resource_flow())?;
    registry.insert(subscribe_resource_flow())?;
    registry.insert(unsubscribe_resource_flow())?;
    registry.insert(list_prompts_flow())?;
    registry.insert(get_prompt_flow())?;
    registry.insert(complete_flow())?;
    registry.insert(set_level_flow())?;
    registry.insert(list_skills_flow())?;
    registry.insert(search_skills_flow())?;
    registry.insert(load_skill_flow())?;
    registry.insert(elicitation_request_flow())?;
    Ok(())
}

fn shared_state(ctx: &FlowCtx) -> FlowResult<Arc<GatewayShared>> {
    ctx.state()
        .get::<GatewayShared>()
        .ok_or_else(|| FlowError::failure("gateway state missing from flow context"))
}

fn parse_params<T: DeserializeOwned>(ctx: &FlowCtx) -> FlowResult<T> {
    serde_json::from_value(ctx.input()).map_err(|e| {
        FlowError::abort_with_status("INVALID_INPUT", format!("malformed params: {e}"), 400)
    })
}

fn respond<T: serde::Serialize>(ctx: &FlowCtx, value: &T) -> FlowResult<()> {
    ctx.set_output(serde_json::to_value(value).map_err(FlowError::failure)?);
    Ok(())
}

fn initialize_flow() -> FlowRecord {
    FlowRecord::new("session:initialize").stage("execute", |ctx: FlowCtx| async move {
        let shared = shared_state(&ctx)?;
        // The envelope is validated but the gateway accepts any client
        // protocol revision and answers with its own.
        let _request: InitializeRequest = parse_params(&ctx)?;

        let has_skills = shared.arena.find_skills(shared.root).is_some();
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(true),
                }),
                resources: Some(ResourcesCapability {
                    subscribe: Some(true),
                    list_changed: Some(true),
                }),
                prompts: Some(PromptsCapability {
                    list_changed: Some(false),
                }),
                logging: Some(json!({})),
                completions: Some(json!({})),
                skills: has_skills.then(|| json!({})),
            },
            server_info: Implementation {
                name: shared.config.name.clone(),
                title: None,
                version: shared.config.version.clone(),
            },
            instructions: shared.config.instructions.clone(),
        };
        respond(&ctx, &result)
    })
}

fn ping_flow() -> FlowRecord {
    FlowRecord::new("session:ping").stage("execute", |ctx: FlowCtx| async move {
        respond(&ctx, &EmptyResult {})
    })
}

fn list_tools_flow() -> FlowRecord {
    FlowRecord::new("tools:list-tools").stage("execute", |ctx: FlowCtx| async move {
        let shared = shared_state(&ctx)?;
        let tools = shared
            .root_scope()
            .tools()
            .list()
            .into_iter()
            .map(|entry| {
                let mut definition = entry.item.definition();
                definition.name = entry.qualified_name.clone();
                definition
            })
            .collect();
        respond(
            &ctx,
            &ListToolsResult {
                tools,
                next_cursor: None,
            },
        )
    })
}

fn list_resources_flow() -> FlowRecord {
    FlowRecord::new("resources:list-resources").stage("execute", |ctx: FlowCtx| async move {
        let shared = shared_state(&ctx)?;
        let resources = shared
            .root_scope()
            .resources()
            .list()
            .into_iter()
            .map(|entry| entry.item.definition.clone())
            .collect();
        respond(
            &ctx,
            &ListResourcesResult {
                resources,
                next_cursor: None,
            },
        )
    })
}

fn list_resource_templates_flow() -> FlowRecord {
    FlowRecord::new("resources:list-templates").stage("execute", |ctx: FlowCtx| async move {
        let shared = shared_state(&ctx)?;
        let resource_templates = shared
            .root_scope()
            .resources()
            .list()
            .into_iter()
            .filter_map(|entry| entry.item.template.clone())
            .collect();
        respond(&ctx, &ListResourceTemplatesResult { resource_templates })
    })
}

fn find_resource_by_uri(
    shared: &GatewayShared,
    uri: &str,
) -> Option<Arc<crossmcp_core::resource::ResourceRecord>> {
    shared
        .root_scope()
        .resources()
        .list()
        .into_iter()
        .find(|entry| entry.item.definition.uri == uri)
        .map(|entry| entry.item)
}

fn read_resource_flow() -> FlowRecord {
    FlowRecord::new("resources:read-resource").stage("execute", |ctx: FlowCtx| async move {
        let shared = shared_state(&ctx)?;
        let request: ReadResourceRequest = parse_params(&ctx)?;

        let record = find_resource_by_uri(&shared, &request.uri).ok_or_else(|| {
            FlowError::abort_with_status(
                "RESOURCE_NOT_FOUND",
                format!("no resource at '{}'", request.uri),
                404,
            )
        })?;
        let contents = record
            .reader
            .read(&request.uri)
            .await
            .map_err(|e| FlowError::failure(e))?;
        respond(&ctx, &ReadResourceResult { contents })
    })
}

fn subscribe_resource_flow() -> FlowRecord {
    FlowRecord::new("resources:subscribe").stage("execute", |ctx: FlowCtx| async move {
        let shared = shared_state(&ctx)?;
        let request: SubscribeRequest = parse_params(&ctx)?;
        if find_resource_by_uri(&shared, &request.uri).is_none() {
            return Err(FlowError::abort_with_status(
                "RESOURCE_NOT_FOUND",
                format!("no resource at '{}'", request.uri),
                404,
            ));
        }
        shared.subscribe_resource(&request.uri, ctx.session_id());
        respond(&ctx, &EmptyResult {})
    })
}

fn unsubscribe_resource_flow() -> FlowRecord {
    FlowRecord::new("resources:unsubscribe").stage("execute", |ctx: FlowCtx| async move {
        let shared = shared_state(&ctx)?;
        let request: SubscribeRequest = parse_params(&ctx)?;
        shared.unsubscribe_resource(&request.uri, ctx.session_id());
        respond(&ctx, &EmptyResult {})
    })
}

fn list_prompts_flow() -> FlowRecord {
    FlowRecord::new("prompts:list-prompts").stage("execute", |ctx: FlowCtx| async move {
        let shared = shared_state(&ctx)?;
        let prompts = shared
            .root_scope()
            .prompts()
            .list()
            .into_iter()
            .map(|entry| entry.item.definition.clone())
            .collect();
        respond(
            &ctx,
            &ListPromptsResult {
                prompts,
                next_cursor: None,
            },
        )
    })
}

fn get_prompt_flow() -> FlowRecord {
    FlowRecord::new("prompts:get-prompt").stage("execute", |ctx: FlowCtx| async move {
        let shared = shared_state(&ctx)?;
        let request: GetPromptRequest = parse_params(&ctx)?;

        let record = shared
            .arena
            .find_prompt(shared.root, &request.name)
            .ok_or_else(|| {
                FlowError::abort_with_status(
                    "PROMPT_NOT_FOUND",
                    format!("no prompt named '{}'", request.name),
                    404,
                )
            })?;
        let arguments = request.arguments.unwrap_or_default();
        record.item.check_arguments(&arguments).map_err(|e| {
            FlowError::abort_with_status("INVALID_INPUT", e.to_string(), 400)
        })?;
        let rendered = record
            .item
            .renderer
            .render(arguments)
            .await
            .map_err(|e| FlowError::failure(e))?;
        respond(&ctx, &rendered)
    })
}

fn complete_flow() -> FlowRecord {
    FlowRecord::new("completion:complete").stage("execute", |ctx: FlowCtx| async move {
        // No completion providers in the core; an empty candidate list
        // keeps the capability honest.
        let _request: Value = ctx.input();
        respond(
            &ctx,
            &CompleteResult {
                completion: Completion {
                    values: Vec::new(),
                    total: Some(0),
                    has_more: Some(false),
                },
            },
        )
    })
}

fn set_level_flow() -> FlowRecord {
    FlowRecord::new("logging:set-level").stage("execute", |ctx: FlowCtx| async move {
        let shared = shared_state(&ctx)?;
        let request: SetLevelRequest = parse_params(&ctx)?;
        shared.session_levels.set(ctx.session_id(), request.level);
        tracing::debug!(
            session = %ctx.session_id(),
            level = request.level.as_str(),
            "session log level updated"
        );
        respond(&ctx, &EmptyResult {})
    })
}

fn skills_registry(
    shared: &GatewayShared,
) -> FlowResult<Arc<dyn crossmcp_core::skills::SkillRegistry>> {
    shared.arena.find_skills(shared.root).ok_or_else(|| {
        FlowError::Interrupt(crossmcp_core::controlflow::ControlSignal::abort_with_status(
            "CAPABILITY_UNAVAILABLE",
            "no skill registry configured",
            501,
        ))
    })
}

fn list_skills_flow() -> FlowRecord {
    FlowRecord::new("skills:list").stage("execute", |ctx: FlowCtx| async move {
        let shared = shared_state(&ctx)?;
        let registry = skills_registry(&shared)?;
        let skills = registry
            .list_skills(SkillListOptions::default())
            .await
            .map_err(|e| FlowError::failure(e))?;
        respond(&ctx, &ListSkillsResult { skills })
    })
}

fn search_skills_flow() -> FlowRecord {
    FlowRecord::new("skills:search").stage("execute", |ctx: FlowCtx| async move {
        let shared = shared_state(&ctx)?;
        let registry = skills_registry(&shared)?;
        let request: SkillSearchRequest = parse_params(&ctx)?;
        let skills = registry
            .search(
                &request.query,
                SkillSearchOptions {
                    limit: request.limit,
                },
            )
            .await
            .map_err(|e| FlowError::failure(e))?;
        respond(&ctx, &SkillSearchResult { skills })
    })
}

fn load_skill_flow() -> FlowRecord {
    FlowRecord::new("skills:load").stage("execute", |ctx: FlowCtx| async move {
        let shared = shared_state(&ctx)?;
        let registry = skills_registry(&shared)?;
        let request: SkillLoadRequest = parse_params(&ctx)?;

        let skill = registry
            .load_skill(&request.id)
            .await
            .map_err(|e| match e {
                crossmcp_core::error::CoreError::NotFound { .. } => FlowError::abort_with_status(
                    "SKILL_NOT_FOUND",
                    format!("no skill with id '{}'", request.id),
                    404,
                ),
                other => FlowError::failure(other),
            })?;

        let registered_tools: Vec<String> = shared
            .root_scope()
            .tools()
            .list()
            .into_iter()
            .map(|entry| entry.item.name.clone())
            .collect();
        let loaded = resolve_skill_load(skill, &registered_tools);

        shared.mark_skill_loaded(ctx.session_id(), &loaded.skill.id);
        if let Some(warning) = &loaded.warning {
            tracing::warn!(session = %ctx.session_id(), %warning, "skill loaded incomplete");
        }
        respond(&ctx, &loaded)
    })
}

fn elicitation_request_flow() -> FlowRecord {
    FlowRecord::new(methods::FLOW_ELICITATION_REQUEST)
        .stage("validate", |ctx: FlowCtx| async move {
            let input = ctx.input();
            let mode: ElicitMode =
                serde_json::from_value(input.get("mode").cloned().unwrap_or(json!("form")))
                    .map_err(|_| {
                        FlowError::abort_with_status("INVALID_INPUT", "unknown elicit mode", 400)
                    })?;
            let message = input.get("message").and_then(Value::as_str).unwrap_or("");
            if message.is_empty() {
                return Err(FlowError::abort_with_status(
                    "INVALID_INPUT",
                    "elicitation message must not be empty",
                    400,
                ));
            }
            if mode == ElicitMode::Url
                && input.get("url").and_then(Value::as_str).is_none()
            {
                return Err(FlowError::abort_with_status(
                    "INVALID_INPUT",
                    "url mode requires a url",
                    400,
                ));
            }
            Ok(())
        })
        .stage("prepare", |ctx: FlowCtx| async move {
            let shared = shared_state(&ctx)?;
            let broker: &Arc<ElicitBroker> = &shared.elicits;
            let input = ctx.input();

            let mode: ElicitMode =
                serde_json::from_value(input.get("mode").cloned().unwrap_or(json!("form")))
                    .map_err(FlowError::failure)?;
            let requested_ttl = input
                .get("ttlMs")
                .and_then(Value::as_u64)
                .map(Duration::from_millis);
            let ttl = broker.clamp_ttl(requested_ttl);

            let params = ElicitCreateParams {
                elicit_id: ElicitBroker::next_elicit_id(),
                mode,
                message: input
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                requested_schema: input.get("requestedSchema").filter(|v| !v.is_null()).cloned(),
                url: input
                    .get("url")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                related_request_id: input
                    .get("relatedRequestId")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            };

            let pending = PendingElicit {
                elicit_id: params.elicit_id.clone(),
                session_id: ctx.session_id().to_string(),
                related_request_id: params.related_request_id.clone(),
                mode: params.mode,
                requested_schema: params.requested_schema.clone(),
                message: params.message.clone(),
                expires_at: Utc::now()
                    + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(300)),
            };
            broker
                .persist_pending(pending)
                .await
                .map_err(|e| FlowError::failure(e))?;

            respond(&ctx, &params)
        })
        .finalize_stage("finalizeRequest", |ctx: FlowCtx| async move {
            tracing::debug!(session = %ctx.session_id(), "elicitation request prepared");
            Ok(())
        })
}
