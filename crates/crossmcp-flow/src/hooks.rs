//! Plugin hook records and their collection rules.
//!
//! A hook binds to `(flow, stage, priority, kind)`; `"*"` matches any
//! flow or stage. Within a stage, `will`/`around` hooks sort by priority
//! descending (higher wraps outermost) and `did` hooks ascending, with
//! registration order as the stable tie-break. A hook may carry a filter
//! predicate; the hook is skipped when it returns false.

use crate::FlowResult;
use crate::ctx::FlowCtx;
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// What a hook does relative to its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// Runs before the stage; may raise a control-flow signal
    Will,
    /// Runs after the stage
    Did,
    /// Wraps the stage with a `next` continuation
    Around,
    /// Runs when a non-control error escapes a stage
    OnError,
}

/// Callback of a `will`/`did`/`on-error` hook.
pub type HookFn = Arc<dyn Fn(FlowCtx) -> BoxFuture<'static, FlowResult<()>> + Send + Sync>;

/// Filter predicate deciding whether a hook runs.
pub type FilterFn = Arc<dyn Fn(&FlowCtx) -> bool + Send + Sync>;

/// Continuation handed to an around hook.
pub struct Next {
    inner: Box<dyn FnOnce(FlowCtx) -> BoxFuture<'static, FlowResult<()>> + Send>,
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Next")
    }
}

impl Next {
    /// Continuation over an arbitrary closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(FlowCtx) -> BoxFuture<'static, FlowResult<()>> + Send + 'static,
    {
        Self { inner: Box::new(f) }
    }

    /// Run the wrapped remainder of the stage.
    pub async fn run(self, ctx: FlowCtx) -> FlowResult<()> {
        (self.inner)(ctx).await
    }
}

/// An around hook; higher priority wraps outermost.
#[async_trait]
pub trait AroundHook: Send + Sync {
    /// Wrap the stage. Skipping `next` skips the stage body.
    async fn call(&self, ctx: FlowCtx, next: Next) -> FlowResult<()>;
}

#[derive(Clone)]
enum HookCallback {
    Simple(HookFn),
    Around(Arc<dyn AroundHook>),
}

/// One plugin hook contribution.
#[derive(Clone)]
pub struct HookRecord {
    /// Flow name or `"*"`
    pub flow: String,
    /// Stage name or `"*"`
    pub stage: String,
    /// Ordering priority; see module docs for direction per kind
    pub priority: i32,
    /// Hook kind
    pub kind: HookKind,
    callback: HookCallback,
    filter: Option<FilterFn>,
    seq: u64,
}

impl fmt::Debug for HookRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRecord")
            .field("flow", &self.flow)
            .field("stage", &self.stage)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .finish()
    }
}

impl HookRecord {
    fn new(
        flow: impl Into<String>,
        stage: impl Into<String>,
        priority: i32,
        kind: HookKind,
        callback: HookCallback,
    ) -> Self {
        Self {
            flow: flow.into(),
            stage: stage.into(),
            priority,
            kind,
            callback,
            filter: None,
            seq: 0,
        }
    }

    /// A `will` hook.
    pub fn will<F, Fut>(
        flow: impl Into<String>,
        stage: impl Into<String>,
        priority: i32,
        f: F,
    ) -> Self
    where
        F: Fn(FlowCtx) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = FlowResult<()>> + Send + 'static,
    {
        Self::new(flow, stage, priority, HookKind::Will, boxed_callback(f))
    }

    /// A `did` hook.
    pub fn did<F, Fut>(
        flow: impl Into<String>,
        stage: impl Into<String>,
        priority: i32,
        f: F,
    ) -> Self
    where
        F: Fn(FlowCtx) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = FlowResult<()>> + Send + 'static,
    {
        Self::new(flow, stage, priority, HookKind::Did, boxed_callback(f))
    }

    /// An `around` hook.
    pub fn around(
        flow: impl Into<String>,
        stage: impl Into<String>,
        priority: i32,
        hook: Arc<dyn AroundHook>,
    ) -> Self {
        Self::new(
            flow,
            stage,
            priority,
            HookKind::Around,
            HookCallback::Around(hook),
        )
    }

    /// An `on-error` hook.
    pub fn on_error<F, Fut>(
        flow: impl Into<String>,
        stage: impl Into<String>,
        priority: i32,
        f: F,
    ) -> Self
    where
        F: Fn(FlowCtx) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = FlowResult<()>> + Send + 'static,
    {
        Self::new(flow, stage, priority, HookKind::OnError, boxed_callback(f))
    }

    /// Attach a filter predicate.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&FlowCtx) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Whether the hook binds to the given flow and stage.
    pub fn matches(&self, flow: &str, stage: &str) -> bool {
        (self.flow == "*" || self.flow == flow) && (self.stage == "*" || self.stage == stage)
    }

    /// Whether the hook should run against this context.
    pub fn passes_filter(&self, ctx: &FlowCtx) -> bool {
        self.filter.as_ref().is_none_or(|f| f(ctx))
    }

    /// Run a simple (`will`/`did`/`on-error`) hook.
    pub async fn invoke(&self, ctx: FlowCtx) -> FlowResult<()> {
        match &self.callback {
            HookCallback::Simple(f) => f(ctx).await,
            HookCallback::Around(_) => Ok(()),
        }
    }

    /// The around callback, when this is an around hook.
    pub fn around_hook(&self) -> Option<Arc<dyn AroundHook>> {
        match &self.callback {
            HookCallback::Around(hook) => Some(Arc::clone(hook)),
            HookCallback::Simple(_) => None,
        }
    }
}

fn boxed_callback<F, Fut>(f: F) -> HookCallback
where
    F: Fn(FlowCtx) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = FlowResult<()>> + Send + 'static,
{
    HookCallback::Simple(Arc::new(move |ctx| Box::pin(f(ctx))))
}

/// Registered hooks for one scope, collected per `(flow, stage, kind)`.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<Vec<HookRecord>>,
    seq: AtomicU64,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("len", &self.hooks.read().len())
            .finish()
    }
}

impl HookRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook; registration order is the stable tie-break.
    pub fn register(&self, mut record: HookRecord) {
        record.seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.hooks.write().push(record);
    }

    fn matching(&self, flow: &str, stage: &str, kind: HookKind) -> Vec<HookRecord> {
        self.hooks
            .read()
            .iter()
            .filter(|h| h.kind == kind && h.matches(flow, stage))
            .cloned()
            .collect()
    }
}

/// Collect and sort hooks of one kind across registries.
///
/// Registries are consulted in the order given (scope, then ancestors,
/// then globals); that order is part of the stable tie-break.
pub fn collect_hooks(
    registries: &[Arc<HookRegistry>],
    flow: &str,
    stage: &str,
    kind: HookKind,
) -> Vec<HookRecord> {
    let mut collected: Vec<(usize, HookRecord)> = Vec::new();
    for (idx, registry) in registries.iter().enumerate() {
        for hook in registry.matching(flow, stage, kind) {
            collected.push((idx, hook));
        }
    }

    match kind {
        HookKind::Will | HookKind::Around | HookKind::OnError => {
            collected.sort_by(|(ia, a), (ib, b)| {
                b.priority
                    .cmp(&a.priority)
                    .then(ia.cmp(ib))
                    .then(a.seq.cmp(&b.seq))
            });
        }
        HookKind::Did => {
            collected.sort_by(|(ia, a), (ib, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then(ia.cmp(ib))
                    .then(a.seq.cmp(&b.seq))
            });
        }
    }

    collected.into_iter().map(|(_, h)| h).collect()
}
