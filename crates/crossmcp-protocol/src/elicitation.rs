//! Elicitation wire types: the server-initiated `elicitation/create`
//! request and the client's `elicitation/result` envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How the client should collect the user's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElicitMode {
    /// Render a form from `requested_schema`
    Form,
    /// Send the user to an external URL
    Url,
}

/// Parameters of a server-initiated `elicitation/create` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElicitCreateParams {
    /// Correlation id for the result envelope
    #[serde(rename = "elicitId")]
    pub elicit_id: String,
    /// Collection mode
    pub mode: ElicitMode,
    /// Message shown to the user
    pub message: String,
    /// JSON Schema of the expected content (form mode)
    #[serde(rename = "requestedSchema", skip_serializing_if = "Option::is_none")]
    pub requested_schema: Option<Value>,
    /// External URL (url mode)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Request id of the in-flight call that triggered the elicit
    #[serde(rename = "relatedRequestId", skip_serializing_if = "Option::is_none")]
    pub related_request_id: Option<String>,
}

/// The client's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElicitAction {
    /// User submitted content
    Accept,
    /// User dismissed without answering
    Cancel,
    /// User explicitly declined
    Decline,
}

/// Parameters of the client's `elicitation/result` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElicitResultParams {
    /// Correlation id from `elicitation/create`
    #[serde(rename = "elicitId")]
    pub elicit_id: String,
    /// The client's decision
    pub action: ElicitAction,
    /// Submitted content (accept only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

/// What the waiting tool observes once the elicit settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElicitResult {
    /// The client's decision after normalization
    pub action: ElicitAction,
    /// Submitted content (accept only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

impl ElicitResult {
    /// A plain decline with no content.
    pub fn decline() -> Self {
        Self {
            action: ElicitAction::Decline,
            content: None,
        }
    }
}

/// Normalize a raw client result against the requested schema.
///
/// `accept` without content on a schema that requires content is treated
/// as `decline`; an accepted required string that is empty likewise.
pub fn normalize_result(params: ElicitResultParams, requested_schema: Option<&Value>) -> ElicitResult {
    if params.action != ElicitAction::Accept {
        return ElicitResult {
            action: params.action,
            content: None,
        };
    }

    let Some(schema) = requested_schema else {
        return ElicitResult {
            action: ElicitAction::Accept,
            content: params.content,
        };
    };

    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|keys| keys.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let Some(content) = params.content else {
        return if required.is_empty() {
            ElicitResult {
                action: ElicitAction::Accept,
                content: None,
            }
        } else {
            ElicitResult::decline()
        };
    };

    for key in &required {
        match content.get(key) {
            None | Some(Value::Null) => return ElicitResult::decline(),
            Some(Value::String(s)) if s.is_empty() => return ElicitResult::decline(),
            Some(_) => {}
        }
    }

    ElicitResult {
        action: ElicitAction::Accept,
        content: Some(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema_requiring(field: &str) -> Value {
        json!({
            "type": "object",
            "properties": { field: { "type": "string" } },
            "required": [field],
        })
    }

    #[test]
    fn accept_with_content_passes() {
        let result = normalize_result(
            ElicitResultParams {
                elicit_id: "e1".into(),
                action: ElicitAction::Accept,
                content: Some(json!({"confirmed": true})),
            },
            Some(&json!({"type": "object", "required": ["confirmed"]})),
        );
        assert_eq!(result.action, ElicitAction::Accept);
        assert_eq!(result.content, Some(json!({"confirmed": true})));
    }

    #[test]
    fn accept_without_required_content_is_decline() {
        let result = normalize_result(
            ElicitResultParams {
                elicit_id: "e1".into(),
                action: ElicitAction::Accept,
                content: None,
            },
            Some(&schema_requiring("userInput")),
        );
        assert_eq!(result, ElicitResult::decline());
    }

    #[test]
    fn accept_with_empty_required_string_is_decline() {
        let result = normalize_result(
            ElicitResultParams {
                elicit_id: "e1".into(),
                action: ElicitAction::Accept,
                content: Some(json!({"userInput": ""})),
            },
            Some(&schema_requiring("userInput")),
        );
        assert_eq!(result, ElicitResult::decline());
    }

    #[test]
    fn cancel_drops_content() {
        let result = normalize_result(
            ElicitResultParams {
                elicit_id: "e1".into(),
                action: ElicitAction::Cancel,
                content: Some(json!({"ignored": true})),
            },
            None,
        );
        assert_eq!(result.action, ElicitAction::Cancel);
        assert!(result.content.is_none());
    }

    #[test]
    fn schemaless_accept_keeps_content() {
        let result = normalize_result(
            ElicitResultParams {
                elicit_id: "e1".into(),
                action: ElicitAction::Accept,
                content: Some(json!("free-form")),
            },
            None,
        );
        assert_eq!(result.content, Some(json!("free-form")));
    }
}
