//! Result shaping: raw tool returns into MCP content blocks plus
//! structured content, driven by the tool's output descriptor.
//!
//! Shaping is a pure function of `(descriptor, raw, limits)`, so a cached
//! shaped result never drifts from a freshly shaped one.

use crate::config::SanitizeLimits;
use crossmcp_protocol::types::{
    AudioContent, CallToolResult, Content, EmbeddedResource, ImageContent, ResourceContents,
    ResourceLink,
};
use serde_json::{Map, Value, json};

/// Keys dropped from every object entering `structuredContent`.
const FORBIDDEN_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Token substituted for over-depth subtrees.
const CIRCULAR_TOKEN: &str = "[Circular]";

/// One parsed output descriptor.
#[derive(Debug, Clone, PartialEq)]
enum Descriptor {
    String,
    Number,
    Boolean,
    Date,
    Image,
    Audio,
    Resource,
    ResourceLink,
    Schema(Value),
}

impl Descriptor {
    fn parse(value: &Value) -> Option<Self> {
        match value {
            Value::String(kind) => match kind.as_str() {
                "string" => Some(Self::String),
                "number" => Some(Self::Number),
                "boolean" => Some(Self::Boolean),
                "date" => Some(Self::Date),
                "image" => Some(Self::Image),
                "audio" => Some(Self::Audio),
                "resource" => Some(Self::Resource),
                "resource_link" => Some(Self::ResourceLink),
                _ => None,
            },
            Value::Object(_) => Some(Self::Schema(value.clone())),
            _ => None,
        }
    }

    fn is_primitive(&self) -> bool {
        matches!(self, Self::String | Self::Number | Self::Boolean | Self::Date)
    }
}

/// Shape a raw tool return into the wire result.
pub fn shape_output(
    descriptor: Option<&Value>,
    raw: &Value,
    limits: &SanitizeLimits,
) -> CallToolResult {
    let Some(descriptor) = descriptor else {
        return shape_undeclared(raw, limits);
    };

    // A tuple descriptor is an array of element descriptors.
    if let Value::Array(elements) = descriptor {
        return shape_tuple(elements, raw, limits);
    }

    match Descriptor::parse(descriptor) {
        Some(single) => shape_single(&single, raw, limits),
        None => shape_undeclared(raw, limits),
    }
}

fn shape_undeclared(raw: &Value, limits: &SanitizeLimits) -> CallToolResult {
    let structured = raw.is_object().then(|| sanitize(raw, limits));
    CallToolResult {
        content: vec![Content::text(stringify(raw))],
        structured_content: structured,
        is_error: None,
    }
}

fn shape_single(descriptor: &Descriptor, raw: &Value, limits: &SanitizeLimits) -> CallToolResult {
    let (content, structured) = shape_element(descriptor, raw, limits);
    let structured_content = structured.map(|value| {
        if descriptor.is_primitive() || !value.is_object() {
            json!({ "content": value })
        } else {
            value
        }
    });
    CallToolResult {
        content,
        structured_content,
        is_error: None,
    }
}

fn shape_tuple(elements: &[Value], raw: &Value, limits: &SanitizeLimits) -> CallToolResult {
    let descriptors: Vec<Descriptor> = elements.iter().filter_map(Descriptor::parse).collect();
    let raw_items: Vec<Value> = match raw {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    };

    let mut content = Vec::new();
    let mut values: Vec<(bool, Value)> = Vec::new();
    for (i, descriptor) in descriptors.iter().enumerate() {
        let item = raw_items.get(i).cloned().unwrap_or(Value::Null);
        let (blocks, structured) = shape_element(descriptor, &item, limits);
        content.extend(blocks);
        if let Some(value) = structured {
            values.push((descriptor.is_primitive(), value));
        }
    }

    let structured_content = match values.len() {
        0 => None,
        1 => {
            let (primitive, value) = values.remove(0);
            Some(if primitive || !value.is_object() {
                json!({ "content": value })
            } else {
                value
            })
        }
        _ => {
            let any_non_primitive = values.iter().any(|(primitive, _)| !primitive);
            if any_non_primitive {
                let mut map = Map::new();
                for (i, (_, value)) in values.into_iter().enumerate() {
                    map.insert(i.to_string(), value);
                }
                Some(Value::Object(map))
            } else {
                Some(json!({
                    "content": values.into_iter().map(|(_, v)| v).collect::<Vec<_>>()
                }))
            }
        }
    };

    CallToolResult {
        content,
        structured_content,
        is_error: None,
    }
}

/// Shape one element: content blocks plus its structured value, if any.
fn shape_element(
    descriptor: &Descriptor,
    raw: &Value,
    limits: &SanitizeLimits,
) -> (Vec<Content>, Option<Value>) {
    match descriptor {
        Descriptor::String => (vec![Content::text(stringify(raw))], None),
        Descriptor::Number | Descriptor::Boolean | Descriptor::Date => {
            (vec![Content::text(stringify(raw))], Some(raw.clone()))
        }
        Descriptor::Image => media_block(raw, |data, mime| {
            Content::Image(ImageContent {
                data,
                mime_type: mime,
            })
        }),
        Descriptor::Audio => media_block(raw, |data, mime| {
            Content::Audio(AudioContent {
                data,
                mime_type: mime,
            })
        }),
        Descriptor::Resource => match serde_json::from_value::<ResourceContents>(raw.clone()) {
            Ok(resource) => (
                vec![Content::Resource(EmbeddedResource { resource })],
                None,
            ),
            Err(_) => (Vec::new(), None),
        },
        Descriptor::ResourceLink => match serde_json::from_value::<ResourceLink>(raw.clone()) {
            Ok(link) => (vec![Content::ResourceLink(link)], None),
            Err(_) => (Vec::new(), None),
        },
        Descriptor::Schema(schema) => {
            // Best effort: a raw value that fails the schema is carried
            // through unchanged rather than dropped.
            let parsed = match jsonschema::validator_for(schema) {
                Ok(validator) if validator.is_valid(raw) => raw.clone(),
                _ => raw.clone(),
            };
            let sanitized = sanitize(&parsed, limits);
            (vec![Content::text(stringify(&sanitized))], Some(sanitized))
        }
    }
}

fn media_block(raw: &Value, build: impl Fn(String, String) -> Content) -> (Vec<Content>, Option<Value>) {
    let data = raw.get("data").and_then(Value::as_str);
    let mime = raw.get("mimeType").and_then(Value::as_str);
    match (data, mime) {
        (Some(data), Some(mime)) => (vec![build(data.to_string(), mime.to_string())], None),
        // Malformed media payloads are rejected silently.
        _ => (Vec::new(), None),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Sanitize a value for `structuredContent`.
///
/// Drops forbidden keys, caps object properties and array lengths, and
/// replaces over-depth subtrees with `"[Circular]"`.
pub fn sanitize(value: &Value, limits: &SanitizeLimits) -> Value {
    sanitize_at(value, limits, 0)
}

fn sanitize_at(value: &Value, limits: &SanitizeLimits, depth: usize) -> Value {
    if depth >= limits.max_depth {
        return Value::String(CIRCULAR_TOKEN.to_string());
    }
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, entry) in map {
                if FORBIDDEN_KEYS.contains(&key.as_str()) {
                    continue;
                }
                if out.len() >= limits.max_properties {
                    break;
                }
                out.insert(key.clone(), sanitize_at(entry, limits, depth + 1));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .take(limits.max_properties)
                .map(|item| sanitize_at(item, limits, depth + 1))
                .collect(),
        ),
        other => other.clone(),
    }
}
