//! MCP method names and the fixed method-to-flow routing table.

/// `initialize`
pub const INITIALIZE: &str = "initialize";
/// `ping`
pub const PING: &str = "ping";
/// `tools/list`
pub const TOOLS_LIST: &str = "tools/list";
/// `tools/call`
pub const TOOLS_CALL: &str = "tools/call";
/// `resources/list`
pub const RESOURCES_LIST: &str = "resources/list";
/// `resources/templates/list`
pub const RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
/// `resources/read`
pub const RESOURCES_READ: &str = "resources/read";
/// `resources/subscribe`
pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
/// `resources/unsubscribe`
pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";
/// `prompts/list`
pub const PROMPTS_LIST: &str = "prompts/list";
/// `prompts/get`
pub const PROMPTS_GET: &str = "prompts/get";
/// `completion/complete`
pub const COMPLETION_COMPLETE: &str = "completion/complete";
/// `logging/setLevel`
pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";
/// `elicitation/create` (server → client)
pub const ELICITATION_CREATE: &str = "elicitation/create";
/// `elicitation/result` (client → server)
pub const ELICITATION_RESULT: &str = "elicitation/result";
/// `notifications/resources/updated` (server → client)
pub const RESOURCES_UPDATED_NOTIFICATION: &str = "notifications/resources/updated";
/// `skills/list`
pub const SKILLS_LIST: &str = "skills/list";
/// `skills/search`
pub const SKILLS_SEARCH: &str = "skills/search";
/// `skills/load`
pub const SKILLS_LOAD: &str = "skills/load";

/// Flow handling `tools/call`
pub const FLOW_CALL_TOOL: &str = "tools:call-tool";
/// Flow handling `elicitation/create`
pub const FLOW_ELICITATION_REQUEST: &str = "elicitation:request";

/// The fixed mapping from inbound method name to flow name.
///
/// Returns `None` for methods the gateway does not dispatch, including
/// `elicitation/result`, which is intercepted at the adapter before
/// dispatch.
pub fn flow_for_method(method: &str) -> Option<&'static str> {
    Some(match method {
        INITIALIZE => "session:initialize",
        PING => "session:ping",
        TOOLS_LIST => "tools:list-tools",
        TOOLS_CALL => FLOW_CALL_TOOL,
        RESOURCES_LIST => "resources:list-resources",
        RESOURCES_TEMPLATES_LIST => "resources:list-templates",
        RESOURCES_READ => "resources:read-resource",
        RESOURCES_SUBSCRIBE => "resources:subscribe",
        RESOURCES_UNSUBSCRIBE => "resources:unsubscribe",
        PROMPTS_LIST => "prompts:list-prompts",
        PROMPTS_GET => "prompts:get-prompt",
        COMPLETION_COMPLETE => "completion:complete",
        LOGGING_SET_LEVEL => "logging:set-level",
        ELICITATION_CREATE => FLOW_ELICITATION_REQUEST,
        SKILLS_LIST => "skills:list",
        SKILLS_SEARCH => "skills:search",
        SKILLS_LOAD => "skills:load",
        _ => return None,
    })
}
