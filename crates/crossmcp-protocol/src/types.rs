//! MCP data model: content blocks, tool/resource/prompt definitions,
//! capabilities, and the initialize handshake.
//!
//! Schemas are carried as raw `serde_json::Value`; validation happens in
//! the server crate where schemas are compiled once per tool.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Protocol revision the gateway negotiates during `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

// ---------------------------------------------------------------------------
// Content blocks
// ---------------------------------------------------------------------------

/// A typed content block inside a tool/prompt/resource result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    /// Plain text
    Text(TextContent),
    /// Base64-encoded image
    Image(ImageContent),
    /// Base64-encoded audio
    Audio(AudioContent),
    /// Embedded resource contents
    Resource(EmbeddedResource),
    /// Link to a resource by URI
    ResourceLink(ResourceLink),
}

impl Content {
    /// Text block helper.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextContent { text: text.into() })
    }
}

/// Text content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    /// The text payload
    pub text: String,
}

/// Image content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageContent {
    /// Base64-encoded image data
    pub data: String,
    /// MIME type, e.g. `image/png`
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// Audio content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioContent {
    /// Base64-encoded audio data
    pub data: String,
    /// MIME type, e.g. `audio/wav`
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// Resource contents, either text or binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContents {
    /// Resource URI
    pub uri: String,
    /// MIME type
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Text contents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64-encoded binary contents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

/// Embedded resource content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedResource {
    /// The embedded resource
    pub resource: ResourceContents,
}

/// Resource link content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLink {
    /// Resource URI
    pub uri: String,
    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// A tool definition as listed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Unique tool name within its scope
    pub name: String,
    /// Human-readable title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Description for model consumption
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the input object
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    /// JSON Schema for the structured output, when declared
    #[serde(rename = "outputSchema", skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Behavioral annotations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<ToolAnnotations>,
}

/// Behavioral hints attached to a tool definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolAnnotations {
    /// Tool does not mutate its environment
    #[serde(rename = "readOnlyHint", skip_serializing_if = "Option::is_none")]
    pub read_only_hint: Option<bool>,
    /// Tool may perform destructive updates
    #[serde(rename = "destructiveHint", skip_serializing_if = "Option::is_none")]
    pub destructive_hint: Option<bool>,
    /// Repeated calls with the same input have no additional effect
    #[serde(rename = "idempotentHint", skip_serializing_if = "Option::is_none")]
    pub idempotent_hint: Option<bool>,
}

/// `tools/call` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolRequest {
    /// Tool name
    pub name: String,
    /// Tool arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// `tools/call` result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    /// Content blocks
    pub content: Vec<Content>,
    /// Structured content mirroring the output schema
    #[serde(rename = "structuredContent", skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    /// Set when the result represents a tool-level failure
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    /// A failed result carrying an explanation and optional data.
    pub fn error(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            content: vec![Content::text(message)],
            structured_content: data,
            is_error: Some(true),
        }
    }
}

/// `tools/list` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    /// Listed tools
    pub tools: Vec<Tool>,
    /// Pagination cursor
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// A resource definition as listed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource URI
    pub uri: String,
    /// Display name
    pub name: String,
    /// Description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A parameterized resource template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTemplate {
    /// RFC 6570 URI template
    #[serde(rename = "uriTemplate")]
    pub uri_template: String,
    /// Display name
    pub name: String,
    /// Description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type of produced contents
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// `resources/read` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceRequest {
    /// URI to read
    pub uri: String,
}

/// `resources/read` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceResult {
    /// Resource contents
    pub contents: Vec<ResourceContents>,
}

/// `resources/list` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResourcesResult {
    /// Listed resources
    pub resources: Vec<Resource>,
    /// Pagination cursor
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// `resources/templates/list` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResourceTemplatesResult {
    /// Listed templates
    #[serde(rename = "resourceTemplates")]
    pub resource_templates: Vec<ResourceTemplate>,
}

/// `resources/subscribe` and `resources/unsubscribe` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// URI to (un)subscribe
    pub uri: String,
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

/// A prompt definition as listed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    /// Prompt name
    pub name: String,
    /// Description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<PromptArgument>>,
}

/// One declared prompt argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name
    pub name: String,
    /// Description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the argument must be supplied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

/// Message role in prompt output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End-user turn
    User,
    /// Assistant turn
    Assistant,
}

/// One message of a rendered prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Message role
    pub role: Role,
    /// Message content
    pub content: Content,
}

/// `prompts/get` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptRequest {
    /// Prompt name
    pub name: String,
    /// Argument values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<HashMap<String, String>>,
}

/// `prompts/get` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptResult {
    /// Description of the rendered prompt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Rendered messages
    pub messages: Vec<PromptMessage>,
}

/// `prompts/list` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPromptsResult {
    /// Listed prompts
    pub prompts: Vec<Prompt>,
    /// Pagination cursor
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// `completion/complete` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    /// What is being completed (prompt or resource reference)
    #[serde(rename = "ref")]
    pub reference: Value,
    /// The argument under completion
    pub argument: CompleteArgument,
}

/// Argument under completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteArgument {
    /// Argument name
    pub name: String,
    /// Partial value typed so far
    pub value: String,
}

/// `completion/complete` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteResult {
    /// Completion values
    pub completion: Completion,
}

/// Completion values with pagination hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// Candidate values
    pub values: Vec<String>,
    /// Total candidates available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Whether more candidates exist
    #[serde(rename = "hasMore", skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
}

// ---------------------------------------------------------------------------
// Skills
// ---------------------------------------------------------------------------

/// A skill summary as listed/searched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    /// Skill id
    pub id: String,
    /// Display name
    pub name: String,
    /// Description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Tool names the skill references
    #[serde(default)]
    pub tools: Vec<String>,
}

/// `skills/search` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillSearchRequest {
    /// Search query
    pub query: String,
    /// Maximum results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedSkill {
    /// The skill
    pub skill: Skill,
    /// Relevance score, higher is better
    pub score: f64,
}

/// `skills/search` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillSearchResult {
    /// Ranked results
    pub skills: Vec<RankedSkill>,
}

/// `skills/load` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillLoadRequest {
    /// Skill id
    pub id: String,
}

/// `skills/load` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillLoadResult {
    /// The loaded skill
    pub skill: Skill,
    /// Referenced tools available in the current scope
    #[serde(rename = "availableTools")]
    pub available_tools: Vec<String>,
    /// Referenced tools not registered in the current scope
    #[serde(rename = "missingTools")]
    pub missing_tools: Vec<String>,
    /// True when no referenced tool is missing
    #[serde(rename = "isComplete")]
    pub is_complete: bool,
    /// Warning when the skill is partially usable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// `skills/list` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSkillsResult {
    /// Listed skills
    pub skills: Vec<Skill>,
}

// ---------------------------------------------------------------------------
// Lifecycle & logging
// ---------------------------------------------------------------------------

/// Server or client implementation info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation name
    pub name: String,
    /// Human-readable title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Implementation version
    pub version: String,
}

/// `initialize` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeRequest {
    /// Requested protocol version
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Client capabilities
    pub capabilities: ClientCapabilities,
    /// Client implementation info
    #[serde(rename = "clientInfo")]
    pub client_info: Implementation,
}

/// `initialize` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Negotiated protocol version
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities
    pub capabilities: ServerCapabilities,
    /// Server implementation info
    #[serde(rename = "serverInfo")]
    pub server_info: Implementation,
    /// Usage instructions surfaced to the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Client-declared capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Client supports elicitation requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elicitation: Option<Value>,
    /// Other capability blobs, passed through untouched
    #[serde(flatten)]
    pub other: HashMap<String, Value>,
}

/// Server-declared capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tool support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    /// Resource support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
    /// Prompt support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,
    /// Logging support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
    /// Completion support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completions: Option<Value>,
    /// Skill discovery support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<Value>,
}

/// Tools capability block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsCapability {
    /// Server emits `notifications/tools/list_changed`
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Resources capability block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesCapability {
    /// Server supports `resources/subscribe`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    /// Server emits `notifications/resources/list_changed`
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Prompts capability block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsCapability {
    /// Server emits `notifications/prompts/list_changed`
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// MCP log severity, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Fine-grained diagnostics
    Debug,
    /// Extra diagnostics below info
    Verbose,
    /// Routine operation
    Info,
    /// Normal but noteworthy
    Notice,
    /// Possible problem
    Warning,
    /// Operation failed
    Error,
    /// Component unusable
    Critical,
    /// Immediate action required
    Alert,
    /// System unusable
    Emergency,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    /// Wire name of the level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Verbose => "verbose",
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
            Self::Alert => "alert",
            Self::Emergency => "emergency",
        }
    }
}

/// `logging/setLevel` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetLevelRequest {
    /// Minimum level the session wants to receive
    pub level: LogLevel,
}

/// Empty result object for acknowledged requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmptyResult {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn content_tagging() {
        let block = Content::text("hello");
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"], "hello");

        let link = Content::ResourceLink(ResourceLink {
            uri: "file:///a".into(),
            name: None,
            description: None,
            mime_type: None,
        });
        let json = serde_json::to_value(&link).unwrap();
        assert_eq!(json["type"], "resource_link");
    }

    #[test]
    fn tool_schema_field_names() {
        let tool = Tool {
            name: "echo".into(),
            title: None,
            description: None,
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: None,
            annotations: Some(ToolAnnotations {
                read_only_hint: Some(true),
                ..Default::default()
            }),
        };
        let json = serde_json::to_value(&tool).unwrap();
        assert!(json.get("inputSchema").is_some());
        assert!(json.get("outputSchema").is_none());
        assert_eq!(json["annotations"]["readOnlyHint"], true);
    }

    #[test]
    fn log_level_ordering_and_names() {
        assert!(LogLevel::Debug < LogLevel::Verbose);
        assert!(LogLevel::Verbose < LogLevel::Info);
        assert!(LogLevel::Warning < LogLevel::Emergency);
        assert_eq!(
            serde_json::to_value(LogLevel::Notice).unwrap(),
            serde_json::json!("notice")
        );
        assert_eq!(LogLevel::Verbose.as_str(), "verbose");
    }

    #[test]
    fn call_tool_error_result() {
        let result = CallToolResult::error("denied", Some(serde_json::json!({"code": "X"})));
        assert_eq!(result.is_error, Some(true));
        assert_eq!(result.content.len(), 1);
    }
}
