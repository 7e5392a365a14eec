//! Flow records: named, staged pipelines with declared schemas.

use crate::FlowResult;
use crate::ctx::FlowCtx;
use async_trait::async_trait;
use crossmcp_core::registry::{Registry, RegistryItem};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Registry type for flows, attached to scopes via their extensions.
pub type FlowRegistry = Registry<FlowRecord>;

/// Which part of the run plan a stage belongs to.
///
/// `Respond` falls through to `Post` and `Finalize`; an abort still owes
/// `Finalize`. The engine keys those semantics off this phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePhase {
    /// Regular pipeline work
    Normal,
    /// Output shaping; still runs after a `Respond`
    Post,
    /// Cleanup and accounting; runs exactly once on every path
    Finalize,
}

/// One entry of a flow's run plan.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// Stage name hooks bind to
    pub name: String,
    /// Phase controlling control-flow fall-through
    pub phase: StagePhase,
}

impl StageSpec {
    /// Normal-phase stage.
    pub fn normal(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: StagePhase::Normal,
        }
    }

    /// Post-phase stage.
    pub fn post(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: StagePhase::Post,
        }
    }

    /// Finalize-phase stage.
    pub fn finalize(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: StagePhase::Finalize,
        }
    }
}

/// Executor of one stage.
pub type StageFn = Arc<dyn Fn(FlowCtx) -> BoxFuture<'static, FlowResult<()>> + Send + Sync>;

/// A named pipeline executing one MCP method end to end.
#[derive(Clone)]
pub struct FlowRecord {
    /// Flow name, e.g. `tools:call-tool`
    pub name: String,
    /// Declared input schema
    pub input_schema: Option<Value>,
    /// Declared output schema
    pub output_schema: Option<Value>,
    /// Names of flows that must initialize before this one
    pub depends_on: Vec<String>,
    run_plan: Vec<StageSpec>,
    stages: HashMap<String, StageFn>,
}

impl fmt::Debug for FlowRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowRecord")
            .field("name", &self.name)
            .field(
                "run_plan",
                &self.run_plan.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl FlowRecord {
    /// Empty flow.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_schema: None,
            output_schema: None,
            depends_on: Vec::new(),
            run_plan: Vec::new(),
            stages: HashMap::new(),
        }
    }

    /// Declare the input schema.
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Declare the output schema.
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Declare initialization dependencies.
    pub fn with_depends_on(mut self, names: Vec<String>) -> Self {
        self.depends_on = names;
        self
    }

    /// Append a normal stage with an executor.
    pub fn stage<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(FlowCtx) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = FlowResult<()>> + Send + 'static,
    {
        self.add_stage(StageSpec::normal(name), Some(boxed_stage(f)))
    }

    /// Append a post stage with an executor.
    pub fn post_stage<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(FlowCtx) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = FlowResult<()>> + Send + 'static,
    {
        self.add_stage(StageSpec::post(name), Some(boxed_stage(f)))
    }

    /// Append a finalize stage with an executor.
    pub fn finalize_stage<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(FlowCtx) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = FlowResult<()>> + Send + 'static,
    {
        self.add_stage(StageSpec::finalize(name), Some(boxed_stage(f)))
    }

    /// Append a stage without an executor; only hooks run there.
    pub fn hook_stage(self, spec: StageSpec) -> Self {
        self.add_stage(spec, None)
    }

    fn add_stage(mut self, spec: StageSpec, executor: Option<StageFn>) -> Self {
        if let Some(f) = executor {
            self.stages.insert(spec.name.clone(), f);
        }
        self.run_plan.push(spec);
        self
    }

    /// The ordered run plan.
    pub fn run_plan(&self) -> &[StageSpec] {
        &self.run_plan
    }

    /// Executor for a stage, when it has one.
    pub fn stage_executor(&self, name: &str) -> Option<StageFn> {
        self.stages.get(name).cloned()
    }
}

fn boxed_stage<F, Fut>(f: F) -> StageFn
where
    F: Fn(FlowCtx) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = FlowResult<()>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

#[async_trait]
impl RegistryItem for FlowRecord {
    fn name(&self) -> &str {
        &self.name
    }

    fn depends_on(&self) -> Vec<String> {
        self.depends_on.clone()
    }
}
