//! Server error taxonomy and JSON-RPC mapping.

use crossmcp_protocol::jsonrpc::{JsonRpcError, JsonRpcErrorCode};
use serde_json::{Value, json};
use std::time::Duration;

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Longest sanitized message forwarded to clients.
const MAX_PUBLIC_MESSAGE_LEN: usize = 256;

/// Gateway error taxonomy.
///
/// Every variant knows its JSON-RPC code and HTTP status hint. Internal
/// errors are sanitized before leaving the process; `Public` errors are
/// safe to echo verbatim.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServerError {
    /// Malformed JSON-RPC envelope
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// What was wrong with the envelope
        message: String,
    },

    /// No flow mapped for the method
    #[error("method not found: {method}")]
    MethodNotFound {
        /// The unmapped method
        method: String,
    },

    /// Parameters failed schema validation
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Validation failure description
        message: String,
    },

    /// A tool's activation guard refused the call
    #[error("tool not activated: {tool}")]
    ToolNotActivated {
        /// The refused tool
        tool: String,
    },

    /// Authorization (skill gating, RBAC) refused the call
    #[error("tool not allowed: {message}")]
    ToolNotAllowed {
        /// Refusal description
        message: String,
    },

    /// Execution is gated on a pending human approval
    #[error("approval required")]
    ApprovalRequired {
        /// Where the user grants approval
        approval_url: String,
    },

    /// Execution is gated on an authorization grant
    #[error("authorization required")]
    AuthorizationRequired {
        /// Where the user authorizes
        auth_url: String,
    },

    /// A pending elicit expired before the client answered
    #[error("elicitation {elicit_id} timed out after {ttl:?}")]
    ElicitationTimeout {
        /// The expired elicit
        elicit_id: String,
        /// The TTL that elapsed
        ttl: Duration,
    },

    /// The transport or store cannot serve the capability
    #[error("capability unavailable: {capability}")]
    CapabilityUnavailable {
        /// The missing capability
        capability: String,
    },

    /// Stored session's authorization hash does not match the caller's
    ///
    /// Treated as session-absent everywhere; details never leak.
    #[error("session not found")]
    SessionMismatch,

    /// Operation requires a resident adapter and none exists
    #[error("invalid session: {session_id}")]
    InvalidSession {
        /// The absent session
        session_id: String,
    },

    /// Carries a code and status hint; safe to echo to clients
    #[error("{code}: {message}")]
    Public {
        /// Stable machine-readable code
        code: String,
        /// Message, safe to echo
        message: String,
        /// HTTP status hint
        status: Option<u16>,
        /// Structured data for the JSON-RPC error
        data: Option<Value>,
    },

    /// Session or pending-elicit store failure
    #[error("store error: {message}")]
    Store {
        /// Failure description
        message: String,
    },

    /// Transport-layer failure
    #[error("transport error: {message}")]
    Transport {
        /// Failure description
        message: String,
    },

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything else; message sanitized before leaving the process
    #[error("internal error: {message}")]
    Internal {
        /// Failure description, logged in full, truncated outbound
        message: String,
    },
}

impl ServerError {
    /// Malformed envelope.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Unmapped method.
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            method: method.into(),
        }
    }

    /// Schema validation failure.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Internal failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Store failure.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Transport failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Public error with a code and status hint.
    pub fn public(code: impl Into<String>, message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Public {
            code: code.into(),
            message: message.into(),
            status,
            data: None,
        }
    }

    /// JSON-RPC error code for this variant.
    pub fn error_code(&self) -> i32 {
        match self {
            Self::InvalidRequest { .. } => JsonRpcErrorCode::InvalidRequest.code(),
            Self::MethodNotFound { .. } => JsonRpcErrorCode::MethodNotFound.code(),
            Self::InvalidInput { .. } | Self::Serialization(_) => {
                JsonRpcErrorCode::InvalidParams.code()
            }
            Self::ToolNotActivated { .. } => -32002,
            Self::ToolNotAllowed { .. } => -32003,
            Self::CapabilityUnavailable { .. } => -32001,
            Self::InvalidSession { .. } | Self::SessionMismatch => -32004,
            Self::Public { .. } => -32000,
            Self::ApprovalRequired { .. }
            | Self::AuthorizationRequired { .. }
            | Self::ElicitationTimeout { .. } => -32000,
            Self::Store { .. } | Self::Transport { .. } | Self::Internal { .. } => {
                JsonRpcErrorCode::InternalError.code()
            }
        }
    }

    /// HTTP status hint for transports that carry one.
    pub fn status_hint(&self) -> u16 {
        match self {
            Self::InvalidRequest { .. } | Self::InvalidInput { .. } | Self::Serialization(_) => 400,
            Self::MethodNotFound { .. } => 404,
            Self::ToolNotActivated { .. }
            | Self::ToolNotAllowed { .. }
            | Self::ApprovalRequired { .. }
            | Self::AuthorizationRequired { .. } => 403,
            Self::CapabilityUnavailable { .. } => 501,
            Self::SessionMismatch | Self::InvalidSession { .. } => 404,
            Self::ElicitationTimeout { .. } => 408,
            Self::Public { status, .. } => status.unwrap_or(400),
            Self::Store { .. } | Self::Transport { .. } | Self::Internal { .. } => 500,
        }
    }

    /// Whether this error surfaces as a tool result with `isError:true`
    /// instead of a JSON-RPC error.
    pub fn is_tool_result_error(&self) -> bool {
        matches!(
            self,
            Self::ApprovalRequired { .. }
                | Self::AuthorizationRequired { .. }
                | Self::ElicitationTimeout { .. }
        )
    }

    /// The JSON-RPC error object, message sanitized where required.
    pub fn to_json_rpc_error(&self) -> JsonRpcError {
        let (message, data) = match self {
            Self::Internal { message } | Self::Store { message } | Self::Transport { message } => {
                // Log the full detail; clients get a generic message.
                tracing::error!(error = %message, "internal error surfaced to client");
                ("Internal error".to_string(), None)
            }
            Self::SessionMismatch => ("session not found".to_string(), None),
            Self::ToolNotActivated { tool } => (
                self.to_string(),
                Some(json!({ "kind": "TOOL_NOT_ACTIVATED", "tool": tool })),
            ),
            Self::ToolNotAllowed { .. } => {
                (self.to_string(), Some(json!({ "kind": "TOOL_NOT_ALLOWED" })))
            }
            Self::ApprovalRequired { approval_url } => (
                self.to_string(),
                Some(json!({ "approval_url": approval_url })),
            ),
            Self::AuthorizationRequired { auth_url } => {
                (self.to_string(), Some(json!({ "auth_url": auth_url })))
            }
            Self::Public { data, .. } => (sanitize_message(&self.to_string()), data.clone()),
            _ => (sanitize_message(&self.to_string()), None),
        };
        JsonRpcError {
            code: self.error_code(),
            message,
            data,
        }
    }
}

/// Truncate and flatten a message before it leaves the process.
pub fn sanitize_message(message: &str) -> String {
    let flat: String = message
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if flat.len() > MAX_PUBLIC_MESSAGE_LEN {
        let mut end = MAX_PUBLIC_MESSAGE_LEN;
        while !flat.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &flat[..end])
    } else {
        flat
    }
}

impl From<crossmcp_core::error::CoreError> for ServerError {
    fn from(err: crossmcp_core::error::CoreError) -> Self {
        use crossmcp_core::error::CoreError;
        match err {
            CoreError::NotFound { kind, name } => Self::Public {
                code: "NOT_FOUND".to_string(),
                message: format!("{kind} not found: {name}"),
                status: Some(404),
                data: None,
            },
            CoreError::Serialization(e) => Self::Serialization(e),
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_mapping_matches_taxonomy() {
        assert_eq!(ServerError::invalid_input("x").error_code(), -32602);
        assert_eq!(ServerError::method_not_found("x").error_code(), -32601);
        assert_eq!(ServerError::invalid_request("x").error_code(), -32600);
        assert_eq!(ServerError::internal("x").error_code(), -32603);
        assert_eq!(
            ServerError::ToolNotActivated { tool: "t".into() }.status_hint(),
            403
        );
        assert_eq!(
            ServerError::CapabilityUnavailable {
                capability: "sse".into()
            }
            .status_hint(),
            501
        );
    }

    #[test]
    fn internal_messages_are_sanitized() {
        let err = ServerError::internal("secret path /etc/passwd\nstack frame 1");
        let rpc = err.to_json_rpc_error();
        assert_eq!(rpc.message, "Internal error");
        assert_eq!(rpc.code, -32603);
    }

    #[test]
    fn session_mismatch_does_not_leak() {
        let rpc = ServerError::SessionMismatch.to_json_rpc_error();
        assert_eq!(rpc.message, "session not found");
        assert!(rpc.data.is_none());
    }

    #[test]
    fn approval_required_is_a_tool_result_error() {
        let err = ServerError::ApprovalRequired {
            approval_url: "https://approve.example/x".into(),
        };
        assert!(err.is_tool_result_error());
        let rpc = err.to_json_rpc_error();
        assert_eq!(
            rpc.data.unwrap()["approval_url"],
            "https://approve.example/x"
        );
    }

    #[test]
    fn sanitize_flattens_and_caps() {
        let long = "a\n".repeat(400);
        let flat = sanitize_message(&long);
        assert!(!flat.contains('\n'));
        assert!(flat.len() <= MAX_PUBLIC_MESSAGE_LEN + 3);
    }
}
