//! Flow execution.

use crate::ctx::FlowCtx;
use crate::hooks::{HookKind, HookRegistry, Next, collect_hooks};
use crate::record::{FlowRecord, StagePhase, StageSpec};
use crate::{FlowError, FlowResult};
use crossmcp_core::controlflow::ControlSignal;
use serde_json::{Value, json};
use std::sync::Arc;

/// Executes flows against a set of hook registries.
///
/// Registries are consulted in order: the dispatching scope's own hooks
/// first, then each ancestor's, then process-wide hooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlowEngine;

impl FlowEngine {
    /// Run a flow to completion.
    ///
    /// Returns the flow output on success (including a `Respond`
    /// short-circuit), or the escaping error after `on-error` hooks and
    /// the finalize stages have run.
    pub async fn run(
        flow: &FlowRecord,
        hook_registries: &[Arc<HookRegistry>],
        ctx: FlowCtx,
    ) -> Result<Value, FlowError> {
        let mut responded = false;
        let mut failure: Option<(String, FlowError)> = None;

        for stage in flow.run_plan() {
            if stage.phase == StagePhase::Finalize || failure.is_some() {
                continue;
            }
            if responded && stage.phase == StagePhase::Normal {
                continue;
            }

            match Self::run_stage(flow, hook_registries, stage, &ctx).await {
                Ok(()) => {}
                Err(FlowError::Interrupt(ControlSignal::Respond(value))) => {
                    tracing::trace!(flow = %flow.name, stage = %stage.name, "respond short-circuit");
                    ctx.set_output(value);
                    responded = true;
                }
                Err(err) => {
                    failure = Some((stage.name.clone(), err));
                }
            }
        }

        if let Some((stage_name, err)) = &failure {
            ctx.set_data("__error__", json!(err.to_string()));
            for hook in collect_hooks(hook_registries, &flow.name, stage_name, HookKind::OnError) {
                if !hook.passes_filter(&ctx) {
                    continue;
                }
                if let Err(hook_err) = hook.invoke(ctx.clone()).await {
                    tracing::warn!(
                        flow = %flow.name,
                        stage = %stage_name,
                        error = %hook_err,
                        "on-error hook failed"
                    );
                }
            }
        }

        // Finalize stages run exactly once, whatever happened above. A
        // failing finalize stage must not mask the primary outcome.
        for stage in flow
            .run_plan()
            .iter()
            .filter(|s| s.phase == StagePhase::Finalize)
        {
            if let Err(err) = Self::run_stage(flow, hook_registries, stage, &ctx).await {
                match err {
                    FlowError::Interrupt(signal) => {
                        tracing::debug!(
                            flow = %flow.name,
                            stage = %stage.name,
                            signal = %signal,
                            "control signal in finalize stage ignored"
                        );
                    }
                    FlowError::Failure(err) => {
                        tracing::warn!(
                            flow = %flow.name,
                            stage = %stage.name,
                            error = %err,
                            "finalize stage failed"
                        );
                    }
                }
            }
        }

        match failure {
            Some((_, err)) => Err(err),
            None => Ok(ctx.output().unwrap_or(Value::Null)),
        }
    }

    async fn run_stage(
        flow: &FlowRecord,
        hook_registries: &[Arc<HookRegistry>],
        stage: &StageSpec,
        ctx: &FlowCtx,
    ) -> FlowResult<()> {
        tracing::trace!(flow = %flow.name, stage = %stage.name, "stage start");

        for hook in collect_hooks(hook_registries, &flow.name, &stage.name, HookKind::Will) {
            if hook.passes_filter(ctx) {
                hook.invoke(ctx.clone()).await?;
            }
        }

        let executor = flow.stage_executor(&stage.name);
        let mut next = Next::new(move |ctx| match executor {
            Some(f) => f(ctx),
            None => Box::pin(async { Ok(()) }),
        });

        // Around hooks come back sorted outermost-first; wrapping in
        // reverse builds the chain inner to outer.
        let arounds = collect_hooks(hook_registries, &flow.name, &stage.name, HookKind::Around);
        for hook in arounds.into_iter().rev() {
            if !hook.passes_filter(ctx) {
                continue;
            }
            let Some(around) = hook.around_hook() else {
                continue;
            };
            let inner = next;
            next = Next::new(move |ctx| Box::pin(async move { around.call(ctx, inner).await }));
        }
        next.run(ctx.clone()).await?;

        for hook in collect_hooks(hook_registries, &flow.name, &stage.name, HookKind::Did) {
            if hook.passes_filter(ctx) {
                hook.invoke(ctx.clone()).await?;
            }
        }
        Ok(())
    }
}
