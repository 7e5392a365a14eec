//! The `tools:call-tool` flow.
//!
//! Fixed stage order: bind providers (with the activation guard), the
//! pre stages (input resolve + schema validation), cache read, execute
//! (wrapped by any around hooks; approval and skill gating are checked
//! immediately before the executor), output shaping, cache write, and a
//! finalize stage that runs exactly once on every path.
//!
//! A cache hit raises `Respond` with the previously shaped result: the
//! executor never runs, `writeCache` is skipped with the rest of the
//! normal stages, and finalize still fires.

use crate::error::ServerError;
use crate::shape;
use crate::shared::GatewayShared;
use crossmcp_core::tool::{ToolInvocation, ToolRecord};
use crossmcp_core::token::Token;
use crossmcp_flow::record::StageSpec;
use crossmcp_flow::{FlowCtx, FlowError, FlowRecord, FlowResult};
use crossmcp_protocol::methods;
use crossmcp_protocol::types::CallToolRequest;
use dashmap::DashMap;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Inter-hook flag marking a cache hit.
pub const CACHE_HIT_FLAG: &str = "__cache_hit__";
/// Inter-hook flag a plugin sets once approval has been granted.
pub const APPROVED_FLAG: &str = "__approved__";
const CACHE_KEY: &str = "__cache_key__";

/// Shaped-result cache for tools that declare `cache`.
#[derive(Default)]
pub struct ToolResultCache {
    entries: DashMap<String, CachedResult>,
}

struct CachedResult {
    value: Value,
    expires_at: Instant,
}

impl fmt::Debug for ToolResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolResultCache")
            .field("len", &self.entries.len())
            .finish()
    }
}

impl ToolResultCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a fresh entry; expired entries are dropped.
    pub fn get(&self, key: &str) -> Option<Value> {
        let hit = self.entries.get(key)?;
        if Instant::now() >= hit.expires_at {
            drop(hit);
            self.entries.remove(key);
            return None;
        }
        Some(hit.value.clone())
    }

    /// Store a shaped result.
    pub fn put(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        self.entries.insert(
            key.into(),
            CachedResult {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

/// Cache key over the tool id and its exact input.
pub fn cache_key(tool_id: &str, input: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(input.to_string().as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Build the `tools:call-tool` flow record.
pub fn call_tool_flow() -> FlowRecord {
    FlowRecord::new(methods::FLOW_CALL_TOOL)
        .stage("bindProviders", bind_providers)
        .hook_stage(StageSpec::normal("resolveInput"))
        .stage("validateInput", validate_input)
        .stage("readCache", read_cache)
        .stage("execute", execute)
        .post_stage("shapeOutput", shape_output)
        .stage("writeCache", write_cache)
        .finalize_stage("finalizeInvoke", finalize_invoke)
}

fn shared_state(ctx: &FlowCtx) -> FlowResult<Arc<GatewayShared>> {
    ctx.state()
        .get::<GatewayShared>()
        .ok_or_else(|| FlowError::failure("gateway state missing from flow context"))
}

fn invocation_state(ctx: &FlowCtx) -> FlowResult<Arc<ToolInvocation>> {
    ctx.state()
        .get::<ToolInvocation>()
        .ok_or_else(|| FlowError::failure("tool invocation missing from flow context"))
}

fn record_state(ctx: &FlowCtx) -> FlowResult<Arc<ToolRecord>> {
    ctx.state()
        .get::<ToolRecord>()
        .ok_or_else(|| FlowError::failure("tool record missing from flow context"))
}

/// Locate the tool, run the activation guard, and bind the invocation
/// context (including hook-supplied request-scoped providers).
async fn bind_providers(ctx: FlowCtx) -> FlowResult<()> {
    let shared = shared_state(&ctx)?;
    let call: CallToolRequest = serde_json::from_value(ctx.input())
        .map_err(|e| FlowError::abort_with_status("INVALID_INPUT", format!("malformed tools/call params: {e}"), 400))?;

    let registered = shared
        .arena
        .find_tool(shared.root, &call.name)
        .or_else(|| shared.root_scope().tools().find_by_qualified_name(&call.name))
        .ok_or_else(|| {
            FlowError::Interrupt(
                crossmcp_core::controlflow::ControlSignal::abort_with_status(
                    "TOOL_NOT_FOUND",
                    format!("no tool named '{}'", call.name),
                    404,
                ),
            )
        })?;

    let invocation = Arc::new(ToolInvocation::new(
        registered.qualified_name.clone(),
        call.name.clone(),
        ctx.session_id(),
        ctx.request_id(),
        call.arguments.unwrap_or_else(|| json!({})),
        ctx.providers().clone(),
        ctx.principal(),
    ));

    if !registered.item.can_activate(&invocation) {
        return Err(FlowError::Interrupt(
            crossmcp_core::controlflow::ControlSignal::abort_with_status(
                "TOOL_NOT_ACTIVATED",
                format!("tool '{}' is not activated for this request", call.name),
                403,
            )
            .with_data(json!({ "tool": call.name })),
        ));
    }

    // The invocation itself is resolvable from the request view, so
    // provider-bound executors and hook factories can reach it.
    ctx.providers()
        .request
        .inject(Token::of::<ToolInvocation>(), Arc::clone(&invocation));

    // Bind the session's elicit out-path so the tool can suspend on
    // user input.
    if let Some(session) = ctx.state().get::<crate::dispatch::SessionContext>()
        && let Some(elicitor) = &session.elicitor
    {
        ctx.providers().request.inject(
            crate::dispatch::elicitor_token(),
            Arc::new(Arc::clone(elicitor)),
        );
    }

    ctx.state().insert(invocation);
    ctx.state().insert(Arc::clone(&registered.item));
    Ok(())
}

/// Validate the (possibly hook-rewritten) input against the tool schema.
async fn validate_input(ctx: FlowCtx) -> FlowResult<()> {
    let shared = shared_state(&ctx)?;
    let record = record_state(&ctx)?;
    let invocation = invocation_state(&ctx)?;

    let validator = shared
        .validator_for(&invocation.tool_id, &record.input_schema)
        .map_err(|e| FlowError::Failure(anyhow::Error::new(e)))?;

    let input = invocation.input();
    if let Err(error) = validator.validate(&input) {
        return Err(FlowError::abort_with_status(
            "INVALID_INPUT",
            format!("input validation failed: {error}"),
            400,
        ));
    }
    Ok(())
}

/// On a declared cache, short-circuit with the previously shaped result.
async fn read_cache(ctx: FlowCtx) -> FlowResult<()> {
    let record = record_state(&ctx)?;
    let Some(_cache) = &record.cache else {
        return Ok(());
    };
    let shared = shared_state(&ctx)?;
    let invocation = invocation_state(&ctx)?;

    let key = cache_key(&invocation.tool_id, &invocation.input());
    if let Some(cached) = shared.tool_cache.get(&key) {
        shared.metrics.record_cache_hit();
        ctx.set_data(CACHE_HIT_FLAG, json!(true));
        invocation.set_data(CACHE_HIT_FLAG, json!(true));
        return Err(FlowError::respond(cached));
    }
    ctx.set_data(CACHE_KEY, json!(key));
    Ok(())
}

/// Run the executor, after the skill-gating and approval checks.
async fn execute(ctx: FlowCtx) -> FlowResult<()> {
    let shared = shared_state(&ctx)?;
    let record = record_state(&ctx)?;
    let invocation = invocation_state(&ctx)?;

    if let Some(gate) = &record.skill_gate
        && !shared.session_has_skill(&invocation.session_id, &gate.skill_id)
    {
        return Err(FlowError::abort_with_status(
            "TOOL_NOT_ALLOWED",
            format!(
                "tool '{}' requires skill '{}' to be loaded",
                invocation.tool_name, gate.skill_id
            ),
            403,
        ));
    }

    if let Some(approval) = &record.approval
        && !invocation.data_flag(APPROVED_FLAG)
    {
        return Err(FlowError::Interrupt(
            crossmcp_core::controlflow::ControlSignal::abort_with_status(
                "APPROVAL_REQUIRED",
                format!("tool '{}' requires approval", invocation.tool_name),
                403,
            )
            .with_data(json!({ "approval_url": approval.approval_url })),
        ));
    }

    let executor = record
        .executor(&invocation.providers)
        .map_err(|e| FlowError::Failure(anyhow::Error::new(e)))?;

    match executor.execute(&invocation).await {
        Ok(raw) => {
            invocation.set_output(raw);
            Ok(())
        }
        Err(crossmcp_core::error::CoreError::Execution { message, data }) => {
            invocation.set_error(&message);
            let mut signal =
                crossmcp_core::controlflow::ControlSignal::abort("TOOL_EXECUTION_ERROR", message);
            if let Some(data) = data {
                signal = signal.with_data(data);
            }
            Err(FlowError::Interrupt(signal))
        }
        Err(other) => {
            invocation.set_error(other.to_string());
            Err(FlowError::Failure(anyhow::Error::new(ServerError::internal(
                other.to_string(),
            ))))
        }
    }
}

/// Normalize the raw return into content blocks + structured content.
async fn shape_output(ctx: FlowCtx) -> FlowResult<()> {
    if ctx.data_flag(CACHE_HIT_FLAG) {
        // The cached value was shaped when it was written.
        return Ok(());
    }
    let shared = shared_state(&ctx)?;
    let record = record_state(&ctx)?;
    let invocation = invocation_state(&ctx)?;

    let Some(raw) = invocation.output() else {
        return Ok(());
    };
    let result = shape::shape_output(
        record.output_descriptor.as_ref(),
        &raw,
        &shared.config.sanitize,
    );
    ctx.set_output(serde_json::to_value(result).map_err(|e| FlowError::failure(e))?);
    Ok(())
}

/// Persist the shaped result for tools that declare a cache.
async fn write_cache(ctx: FlowCtx) -> FlowResult<()> {
    let record = record_state(&ctx)?;
    let Some(cache) = &record.cache else {
        return Ok(());
    };
    let shared = shared_state(&ctx)?;

    if let Some(Value::String(key)) = ctx.data(CACHE_KEY)
        && let Some(output) = ctx.output()
    {
        shared.tool_cache.put(key, output, cache.ttl);
    }
    Ok(())
}

/// Accounting; runs exactly once whatever happened upstream.
async fn finalize_invoke(ctx: FlowCtx) -> FlowResult<()> {
    let shared = shared_state(&ctx)?;
    let failed = ctx.data("__error__").is_some();
    shared.metrics.record_tool_invocation(failed);

    if let Ok(invocation) = invocation_state(&ctx) {
        tracing::debug!(
            tool = %invocation.tool_id,
            session = %invocation.session_id,
            request = %invocation.request_id,
            failed,
            cache_hit = ctx.data_flag(CACHE_HIT_FLAG),
            "tool invocation finalized"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_stable_per_tool_and_input() {
        let a = cache_key("app.echo", &json!({"x": 1}));
        assert_eq!(a, cache_key("app.echo", &json!({"x": 1})));
        assert_ne!(a, cache_key("app.echo", &json!({"x": 2})));
        assert_ne!(a, cache_key("app.other", &json!({"x": 1})));
    }

    #[tokio::test]
    async fn cache_expires_entries() {
        let cache = ToolResultCache::new();
        cache.put("k", json!(1), Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get("k").is_none());

        cache.put("k", json!(2), Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(json!(2)));
    }
}
