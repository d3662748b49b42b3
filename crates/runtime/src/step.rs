//! Execution of a single step: templating, validation, dispatch, negation
//! and the `onFailure` hook.

use std::collections::BTreeMap;
use std::time::Duration;

use hidra_core::Metric;
use tracing::{debug, warn};

use crate::error::StepError;
use crate::plugin::{Plugin, PluginContext, StepRequest, ON_FAILURE};
use crate::state::EvaluationState;
use crate::template::TemplateEngine;

/// Budget for `onFailure` and `onClose` hooks, independent of the run
/// deadline so hooks still run after a deadline abort.
pub const HOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one step. Metrics are kept even when `result` is an error.
#[derive(Debug)]
pub struct StepExecution {
    pub metrics: Vec<Metric>,
    /// Arguments after template expansion.
    pub rendered: BTreeMap<String, String>,
    pub result: Result<(), StepError>,
}

impl StepExecution {
    fn failed(error: StepError) -> Self {
        Self {
            metrics: Vec::new(),
            rendered: BTreeMap::new(),
            result: Err(error),
        }
    }
}

pub struct StepRuntime {
    ctx: PluginContext,
    templates: TemplateEngine,
}

impl StepRuntime {
    pub fn new(ctx: PluginContext) -> Self {
        Self {
            ctx,
            templates: TemplateEngine::new(),
        }
    }

    pub fn context(&self) -> &PluginContext {
        &self.ctx
    }

    pub fn templates(&self) -> &TemplateEngine {
        &self.templates
    }

    /// Run `step` against `state`. Errors are recorded under `last.error`.
    pub async fn execute(&self, state: &mut EvaluationState, step: &StepRequest) -> StepExecution {
        let execution = self.execute_inner(state, step).await;
        if let Err(ref e) = execution.result {
            state.set_last_error(e.to_string());
        }
        execution
    }

    async fn execute_inner(&self, state: &mut EvaluationState, step: &StepRequest) -> StepExecution {
        let registry = &self.ctx.registry;

        let Some(plugin) = registry.get(&step.plugin) else {
            return StepExecution::failed(StepError::UnknownPlugin(step.plugin.clone()));
        };

        let Some(definition) = registry.definition(&step.plugin, &step.action) else {
            if step.action == ON_FAILURE {
                // Plugins without their own hook surface the recorded error.
                let result = match state.last_error() {
                    Some(last) => Err(StepError::Execution(last.to_string())),
                    None => Ok(()),
                };
                return StepExecution {
                    metrics: Vec::new(),
                    rendered: BTreeMap::new(),
                    result,
                };
            }
            return StepExecution::failed(StepError::UnknownAction {
                plugin: step.plugin.clone(),
                action: step.action.clone(),
            });
        };

        let rendered = match self.templates.render_args(&step.args, state) {
            Ok(r) => r,
            Err(e) => return StepExecution::failed(e),
        };

        if let Some(name) = definition.missing_required(&rendered) {
            return StepExecution {
                metrics: Vec::new(),
                rendered,
                result: Err(StepError::MissingArgument(name.to_string())),
            };
        }

        let request = StepRequest {
            plugin: step.plugin.clone(),
            action: step.action.clone(),
            args: rendered.clone(),
            negate: step.negate,
        };

        let mut metrics = Vec::new();
        let outcome = self.dispatch(plugin.as_ref(), state, &request, &mut metrics).await;

        let result = match outcome {
            Err(StepError::Timeout(d)) => Err(StepError::Timeout(d)),
            Ok(()) if step.negate => Err(StepError::UnexpectedSuccess),
            Err(e) if step.negate => {
                debug!(step = %step, error = %e, "negated step failed as expected");
                Ok(())
            }
            other => other,
        };

        if let Err(ref e) = result {
            if step.action != ON_FAILURE {
                state.set_last_error(e.to_string());
                self.on_failure(plugin.as_ref(), state).await;
            }
        }

        StepExecution {
            metrics,
            rendered,
            result,
        }
    }

    /// Call the handler under the run deadline.
    async fn dispatch(
        &self,
        plugin: &dyn Plugin,
        state: &mut EvaluationState,
        request: &StepRequest,
        out: &mut Vec<Metric>,
    ) -> Result<(), StepError> {
        let Some(deadline) = state.deadline() else {
            return plugin.run_step(&self.ctx, state, request, out).await;
        };
        let budget = state.remaining();
        match tokio::time::timeout_at(deadline, plugin.run_step(&self.ctx, state, request, out)).await {
            Ok(result) => result,
            Err(_) => Err(StepError::Timeout(budget)),
        }
    }

    async fn on_failure(&self, plugin: &dyn Plugin, state: &mut EvaluationState) {
        if !self.ctx.registry.has_action(plugin.name(), ON_FAILURE) {
            return;
        }
        if let Err(e) = self.run_hook(plugin, ON_FAILURE, state).await {
            debug!(plugin = plugin.name(), error = %e, "onFailure hook failed");
        }
    }

    /// Run a reserved hook action with [`HOOK_TIMEOUT`]. Emitted metrics are
    /// discarded.
    pub async fn run_hook(
        &self,
        plugin: &dyn Plugin,
        action: &str,
        state: &mut EvaluationState,
    ) -> Result<(), StepError> {
        let request = StepRequest::new(plugin.name(), action);
        let mut discarded = Vec::new();
        match tokio::time::timeout(
            HOOK_TIMEOUT,
            plugin.run_step(&self.ctx, state, &request, &mut discarded),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(plugin = plugin.name(), action, "hook timed out");
                Err(StepError::Timeout(HOOK_TIMEOUT))
            }
        }
    }
}
