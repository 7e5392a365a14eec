//! # crossmcp-flow
//!
//! The staged pipeline engine. A *flow* is an ordered run plan of named
//! stages; plugins attach *hooks* (`will`/`did`/`around`/`on-error`) to
//! `(flow, stage)` with priorities. Control-flow signals short-circuit
//! the plan: `Respond` skips to the post/finalize stages, `Abort` and
//! `RetryAfter` skip post but still run `on-error` hooks and finalize.
//! Finalize stages run exactly once on every path.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod ctx;
pub mod engine;
pub mod hooks;
pub mod record;

pub use ctx::FlowCtx;
pub use engine::FlowEngine;
pub use hooks::{
    AroundHook, FilterFn, HookFn, HookKind, HookRecord, HookRegistry, Next, collect_hooks,
};
pub use record::{FlowRecord, FlowRegistry, StageFn, StagePhase, StageSpec};

use crossmcp_core::controlflow::ControlSignal;
use serde_json::Value;

/// Result alias for stage and hook callbacks.
pub type FlowResult<T> = Result<T, FlowError>;

/// What escapes a stage: a control-flow signal or a real failure.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// First-class control flow; never logged as an error
    #[error("control: {0}")]
    Interrupt(ControlSignal),

    /// A genuine failure
    #[error(transparent)]
    Failure(#[from] anyhow::Error),
}

impl FlowError {
    /// Short-circuit with an output value.
    pub fn respond(value: Value) -> Self {
        Self::Interrupt(ControlSignal::respond(value))
    }

    /// Abort with a public code.
    pub fn abort(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Interrupt(ControlSignal::abort(code, message))
    }

    /// Abort with a status hint.
    pub fn abort_with_status(
        code: impl Into<String>,
        message: impl Into<String>,
        status: u16,
    ) -> Self {
        Self::Interrupt(ControlSignal::abort_with_status(code, message, status))
    }

    /// Failure from a displayable error.
    pub fn failure(err: impl std::fmt::Display) -> Self {
        Self::Failure(anyhow::anyhow!("{err}"))
    }

    /// The interrupt, when this is control flow.
    pub fn interrupt(&self) -> Option<&ControlSignal> {
        match self {
            Self::Interrupt(signal) => Some(signal),
            Self::Failure(_) => None,
        }
    }
}

impl From<ControlSignal> for FlowError {
    fn from(signal: ControlSignal) -> Self {
        Self::Interrupt(signal)
    }
}

impl From<crossmcp_core::error::CoreError> for FlowError {
    fn from(err: crossmcp_core::error::CoreError) -> Self {
        Self::Failure(anyhow::Error::new(err))
    }
}
