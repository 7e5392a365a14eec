//! # crossmcp-protocol
//!
//! Wire types for the crossmcp gateway: the JSON-RPC 2.0 envelope, the MCP
//! data model (content blocks, tools, resources, prompts, skills,
//! capabilities), and the elicitation request/result pair.
//!
//! This crate is deliberately passive - no I/O, no validation state, just
//! serde types and the fixed method-to-flow table. Schema validation and
//! dispatch live in `crossmcp-server`.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod elicitation;
pub mod jsonrpc;
pub mod methods;
pub mod types;

pub use elicitation::{
    ElicitAction, ElicitCreateParams, ElicitMode, ElicitResult, ElicitResultParams,
    normalize_result,
};
pub use jsonrpc::{
    JSONRPC_VERSION, JsonRpcError, JsonRpcErrorCode, JsonRpcNotification, JsonRpcRequest,
    JsonRpcRequestBody, JsonRpcResponse, JsonRpcResponsePayload, JsonRpcVersion, RequestId,
    ResponseId,
};
pub use types::{
    CallToolRequest, CallToolResult, ClientCapabilities, Content, EmptyResult, Implementation,
    InitializeRequest, InitializeResult, ListPromptsResult, ListResourcesResult, ListSkillsResult,
    ListToolsResult, LogLevel, PROTOCOL_VERSION, Prompt, RankedSkill, ReadResourceRequest,
    ReadResourceResult, Resource, ServerCapabilities, SetLevelRequest, Skill, SkillLoadResult,
    SkillSearchResult, Tool, ToolAnnotations,
};
