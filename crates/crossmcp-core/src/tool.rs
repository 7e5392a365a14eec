//! Tool records and the per-invocation context.
//!
//! A [`ToolRecord`] is the normalized registration form: metadata,
//! schemas, cache/approval/skill-gating configuration, and an executor
//! binding that yields the actual implementation - either a
//! pre-instantiated executor or a provider token resolved through the
//! request's views at call time.

use crate::context::Principal;
use crate::error::{CoreError, CoreResult};
use crate::provider::ProviderViews;
use crate::registry::RegistryItem;
use crate::token::Token;
use async_trait::async_trait;
use crossmcp_protocol::types::{Tool, ToolAnnotations};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Result caching declared on a tool.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a cached result stays valid
    pub ttl: Duration,
}

/// Human-approval gating declared on a tool.
#[derive(Debug, Clone)]
pub struct ApprovalConfig {
    /// Where the user grants approval
    pub approval_url: String,
}

/// Restrict a tool to sessions that have loaded a skill.
#[derive(Debug, Clone)]
pub struct SkillGate {
    /// Required skill id
    pub skill_id: String,
}

/// The executable part of a tool.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run the tool against the invocation context.
    async fn execute(&self, invocation: &ToolInvocation) -> CoreResult<Value>;
}

struct FnExecutor<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ToolExecutor for FnExecutor<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = CoreResult<Value>> + Send,
{
    async fn execute(&self, invocation: &ToolInvocation) -> CoreResult<Value> {
        (self.f)(invocation.input()).await
    }
}

/// How a record yields its executor.
#[derive(Clone)]
pub enum ExecutorBinding {
    /// Pre-instantiated executor
    Instance(Arc<dyn ToolExecutor>),
    /// Resolve an `Arc<dyn ToolExecutor>` from the provider views
    Provider(Token),
}

impl fmt::Debug for ExecutorBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(_) => write!(f, "Instance"),
            Self::Provider(token) => write!(f, "Provider({})", token.name()),
        }
    }
}

type ActivationPredicate = Arc<dyn Fn(&ToolInvocation) -> bool + Send + Sync>;

/// Normalized tool registration.
#[derive(Clone)]
pub struct ToolRecord {
    /// Unique name within its scope
    pub name: String,
    /// Display title
    pub title: Option<String>,
    /// Description for model consumption
    pub description: Option<String>,
    /// JSON Schema the input is validated against
    pub input_schema: Value,
    /// Output descriptor: a kind string, a schema object, or a tuple array
    pub output_descriptor: Option<Value>,
    /// Behavioral annotations
    pub annotations: Option<ToolAnnotations>,
    /// Result caching
    pub cache: Option<CacheConfig>,
    /// Human-approval gating
    pub approval: Option<ApprovalConfig>,
    /// Skill gating
    pub skill_gate: Option<SkillGate>,
    /// Names of registry records this tool initializes after
    pub registry_depends_on: Vec<String>,
    executor: ExecutorBinding,
    activation: Option<ActivationPredicate>,
}

impl fmt::Debug for ToolRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRecord")
            .field("name", &self.name)
            .field("cached", &self.cache.is_some())
            .field("executor", &self.executor)
            .finish()
    }
}

impl ToolRecord {
    /// Record with an instantiated executor.
    pub fn new(
        name: impl Into<String>,
        input_schema: Value,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: None,
            input_schema,
            output_descriptor: None,
            annotations: None,
            cache: None,
            approval: None,
            skill_gate: None,
            registry_depends_on: Vec::new(),
            executor: ExecutorBinding::Instance(executor),
            activation: None,
        }
    }

    /// Normalize a plain async function into a record.
    pub fn from_fn<F, Fut>(name: impl Into<String>, input_schema: Value, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<Value>> + Send + 'static,
    {
        Self::new(name, input_schema, Arc::new(FnExecutor { f }))
    }

    /// Record whose executor is resolved from the provider views.
    pub fn from_provider(name: impl Into<String>, input_schema: Value, token: Token) -> Self {
        Self {
            executor: ExecutorBinding::Provider(token),
            ..Self::new(name, input_schema, Arc::new(FnExecutor { f: unreachable_fn }))
        }
    }

    /// Set the display title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declare the output descriptor.
    pub fn with_output(mut self, descriptor: Value) -> Self {
        self.output_descriptor = Some(descriptor);
        self
    }

    /// Set behavioral annotations.
    pub fn with_annotations(mut self, annotations: ToolAnnotations) -> Self {
        self.annotations = Some(annotations);
        self
    }

    /// Enable result caching.
    pub fn with_cache(mut self, ttl: Duration) -> Self {
        self.cache = Some(CacheConfig { ttl });
        self
    }

    /// Require human approval before execution.
    pub fn with_approval(mut self, approval_url: impl Into<String>) -> Self {
        self.approval = Some(ApprovalConfig {
            approval_url: approval_url.into(),
        });
        self
    }

    /// Restrict to sessions that loaded a skill.
    pub fn with_skill_gate(mut self, skill_id: impl Into<String>) -> Self {
        self.skill_gate = Some(SkillGate {
            skill_id: skill_id.into(),
        });
        self
    }

    /// Attach an activation predicate consulted before binding.
    pub fn with_activation<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ToolInvocation) -> bool + Send + Sync + 'static,
    {
        self.activation = Some(Arc::new(predicate));
        self
    }

    /// Whether the tool activates for this invocation.
    pub fn can_activate(&self, invocation: &ToolInvocation) -> bool {
        self.activation.as_ref().is_none_or(|p| p(invocation))
    }

    /// Resolve the executor, through the views when provider-bound.
    pub fn executor(&self, views: &ProviderViews) -> CoreResult<Arc<dyn ToolExecutor>> {
        match &self.executor {
            ExecutorBinding::Instance(executor) => Ok(Arc::clone(executor)),
            ExecutorBinding::Provider(token) => {
                let bound: Arc<Arc<dyn ToolExecutor>> = views.resolve(token)?;
                Ok(Arc::clone(&bound))
            }
        }
    }

    /// The wire definition listed to clients.
    pub fn definition(&self) -> Tool {
        Tool {
            name: self.name.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            output_schema: self
                .output_descriptor
                .as_ref()
                .filter(|d| d.is_object())
                .cloned(),
            annotations: self.annotations.clone(),
        }
    }
}

fn unreachable_fn(_: Value) -> futures::future::Ready<CoreResult<Value>> {
    futures::future::ready(Err(CoreError::execution(
        "provider-bound tool executed without resolution",
    )))
}

#[async_trait]
impl RegistryItem for ToolRecord {
    fn name(&self) -> &str {
        &self.name
    }

    fn depends_on(&self) -> Vec<String> {
        self.registry_depends_on.clone()
    }
}

/// Per-invocation record shared by the pipeline stages and hooks.
pub struct ToolInvocation {
    /// Fully qualified tool id
    pub tool_id: String,
    /// Plain tool name
    pub tool_name: String,
    /// Owning session
    pub session_id: String,
    /// Inbound request id
    pub request_id: String,
    input: RwLock<Value>,
    output: RwLock<Option<Value>>,
    error: RwLock<Option<String>>,
    data: RwLock<HashMap<String, Value>>,
    /// Materialized provider views, stable for the invocation
    pub providers: ProviderViews,
    /// Verified caller, absent on anonymous transports
    pub user: Option<Arc<Principal>>,
}

impl fmt::Debug for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolInvocation")
            .field("tool_id", &self.tool_id)
            .field("session_id", &self.session_id)
            .field("request_id", &self.request_id)
            .finish()
    }
}

impl ToolInvocation {
    /// New invocation context.
    pub fn new(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        session_id: impl Into<String>,
        request_id: impl Into<String>,
        input: Value,
        providers: ProviderViews,
        user: Option<Arc<Principal>>,
    ) -> Self {
        Self {
            tool_id: tool_id.into(),
            tool_name: tool_name.into(),
            session_id: session_id.into(),
            request_id: request_id.into(),
            input: RwLock::new(input),
            output: RwLock::new(None),
            error: RwLock::new(None),
            data: RwLock::new(HashMap::new()),
            providers,
            user,
        }
    }

    /// Current (possibly hook-rewritten) input.
    pub fn input(&self) -> Value {
        self.input.read().clone()
    }

    /// Replace the input; pre-stages use this to resolve references.
    pub fn set_input(&self, input: Value) {
        *self.input.write() = input;
    }

    /// Current output, if any stage produced one.
    pub fn output(&self) -> Option<Value> {
        self.output.read().clone()
    }

    /// Set the output.
    pub fn set_output(&self, output: Value) {
        *self.output.write() = Some(output);
    }

    /// Recorded error message, if the invocation failed.
    pub fn error(&self) -> Option<String> {
        self.error.read().clone()
    }

    /// Record the failure message for finalize-stage consumers.
    pub fn set_error(&self, message: impl Into<String>) {
        *self.error.write() = Some(message.into());
    }

    /// Read an inter-hook data entry.
    pub fn data(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    /// Write an inter-hook data entry.
    pub fn set_data(&self, key: impl Into<String>, value: Value) {
        self.data.write().insert(key.into(), value);
    }

    /// Whether a data entry is set to `true`.
    pub fn data_flag(&self, key: &str) -> bool {
        self.data
            .read()
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
