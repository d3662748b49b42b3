//! Sample runner: executes one sample's steps for one variable scope.
//!
//! Owns the evaluation state for the run, threads it through every step,
//! builds a report on failure and fires `onClose` hooks afterwards.


use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hidra_core::{ConnInfo, Metric, Report, ResponseInfo, SampleConfig};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::StepError;
use crate::plugin::{PluginContext, StepRequest, ON_CLOSE};
use crate::state::{EvaluationState, StateKey, StateValue};
use crate::step::StepRuntime;

/// Floor applied to every sample's per-run timeout.
pub const MIN_RUN_TIMEOUT: Duration = Duration::from_secs(10);

/// Destination for failure reports.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn publish(&self, report: &Report) -> anyhow::Result<()>;
}

/// Outcome of one attempted step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub index: usize,
    pub plugin: String,
    pub action: String,
    pub success: bool,
    pub elapsed: Duration,
    /// Number of metrics this step contributed to [`RunOutcome::metrics`].
    pub metric_count: usize,
}

impl StepRecord {
    /// Value of the `step` label. The index keeps repeated actions apart.
    pub fn label(&self) -> String {
        format!("{}-{}", self.index, self.action)
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub metrics: Vec<Metric>,
    pub steps: Vec<StepRecord>,
    pub error: Option<StepError>,
    pub elapsed: Duration,
    pub attempts: u32,
    /// Time spent across every attempt, excluding report delivery.
    pub busy: Duration,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    /// Metrics grouped by the step that produced them, in step order.
    pub fn metrics_by_step(&self) -> impl Iterator<Item = (&StepRecord, &[Metric])> {
        let mut offset = 0;
        self.steps.iter().map(move |step| {
            let end = (offset + step.metric_count).min(self.metrics.len());
            let slice = &self.metrics[offset.min(end)..end];
            offset = end;
            (step, slice)
        })
    }
}

pub struct SampleRunner {
    steps: StepRuntime,
    reporter: Option<Arc<dyn Reporter>>,
}

impl SampleRunner {
    pub fn new(ctx: PluginContext) -> Self {
        Self {
            steps: StepRuntime::new(ctx),
            reporter: None,
        }
    }

    /// Publish a report for every failed run. Without a reporter no report
    /// is built.
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Run `sample` once for `scope`, retrying failed attempts up to
    /// `sample.retry` times. Only the final failed attempt is reported.
    pub async fn run(&self, sample: &SampleConfig, scope: &BTreeMap<String, String>) -> RunOutcome {
        let mut attempt = 0u32;
        let mut busy = Duration::ZERO;
        loop {
            attempt += 1;
            let attempt_start = Instant::now();
            let (mut outcome, report) = self.run_once(sample, scope).await;
            busy += attempt_start.elapsed();
            outcome.attempts = attempt;
            outcome.busy = busy;

            let retry = match outcome.error {
                Some(ref e) if attempt <= sample.retry => {
                    warn!(sample = %sample.name, attempt, error = %e, "sample run failed, retrying");
                    true
                }
                _ => false,
            };
            if retry {
                continue;
            }

            if let Some(report) = report {
                self.publish(&report).await;
            }
            return outcome;
        }
    }

    async fn run_once(
        &self,
        sample: &SampleConfig,
        scope: &BTreeMap<String, String>,
    ) -> (RunOutcome, Option<Report>) {
        let start = Instant::now();
        let timeout = sample.timeout.max(MIN_RUN_TIMEOUT);
        let mut state = EvaluationState::new(start + timeout);
        state.set_text(StateKey::Sample, sample.name.clone());

        let mut metrics = Vec::new();
        let mut records = Vec::new();
        let mut plugins_used: Vec<String> = Vec::new();
        let mut error = None;

        let variables = match self.steps.templates().render_scope(scope) {
            Ok(v) => v,
            Err(e) => {
                error = Some(e);
                scope.clone()
            }
        };
        state.insert(StateKey::Variables, StateValue::Variables(variables.clone()));

        if error.is_none() {
            let mut current_plugin = String::new();
            for (index, step) in sample.steps.iter().enumerate() {
                if !step.plugin.is_empty() {
                    current_plugin = step.plugin.clone();
                }
                if !plugins_used.contains(&current_plugin) {
                    plugins_used.push(current_plugin.clone());
                }

                let request = StepRequest {
                    plugin: current_plugin.clone(),
                    action: step.action.clone(),
                    args: step.parameters.clone(),
                    negate: step.negate,
                };

                let step_start = Instant::now();
                let execution = self.steps.execute(&mut state, &request).await;
                let elapsed = step_start.elapsed();

                let mut step_metrics = execution.metrics;
                restore_raw_labels(&mut step_metrics, &step.parameters, &execution.rendered);
                let metric_count = step_metrics.len();
                metrics.extend(step_metrics);

                records.push(StepRecord {
                    index,
                    plugin: current_plugin.clone(),
                    action: step.action.clone(),
                    success: execution.result.is_ok(),
                    elapsed,
                    metric_count,
                });

                if let Err(e) = execution.result {
                    debug!(
                        sample = %sample.name,
                        step = %request,
                        kind = %e.kind(),
                        error = %e,
                        "step failed, aborting run"
                    );
                    error = Some(e);
                    break;
                }
            }
        }

        let elapsed = start.elapsed();
        let report = match (&error, &self.reporter) {
            (Some(e), Some(_)) => Some(build_report(sample, &variables, elapsed, &metrics, e, &mut state)),
            _ => None,
        };

        self.close_plugins(&plugins_used, &mut state).await;
        drop(state);

        let outcome = RunOutcome {
            metrics,
            steps: records,
            error,
            elapsed,
            attempts: 1,
            busy: Duration::ZERO,
        };
        (outcome, report)
    }

    async fn close_plugins(&self, plugins: &[String], state: &mut EvaluationState) {
        let registry = &self.steps.context().registry;
        for name in plugins {
            if !registry.has_action(name, ON_CLOSE) {
                continue;
            }
            let Some(plugin) = registry.get(name) else {
                continue;
            };
            if let Err(e) = self.steps.run_hook(plugin.as_ref(), ON_CLOSE, state).await {
                warn!(plugin = %name, error = %e, "onClose hook failed");
            }
        }
    }

    async fn publish(&self, report: &Report) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        if let Err(e) = reporter.publish(report).await {
            warn!(sample = %report.name, error = %e, "failed to publish report");
        }
    }
}

/// Put template sources back into label values so series stay stable
/// across runs whose rendered parameters differ. Only the label named after
/// the parameter is touched.
fn restore_raw_labels(
    metrics: &mut [Metric],
    raw: &BTreeMap<String, String>,
    rendered: &BTreeMap<String, String>,
) {
    for (key, raw_value) in raw {
        let Some(rendered_value) = rendered.get(key) else {
            continue;
        };
        if rendered_value == raw_value {
            continue;
        }
        for metric in metrics.iter_mut() {
            if let Some(value) = metric.labels.get_mut(key) {
                if value == rendered_value {
                    *value = raw_value.clone();
                }
            }
        }
    }
}

fn build_report(
    sample: &SampleConfig,
    variables: &BTreeMap<String, String>,
    elapsed: Duration,
    metrics: &[Metric],
    error: &StepError,
    state: &mut EvaluationState,
) -> Report {
    let response_info = state.http_response().ok().map(|r| ResponseInfo {
        headers: r.headers.clone(),
        status_code: r.status_code,
    });
    Report {
        name: sample.name.clone(),
        path: sample.path.display().to_string(),
        variables: variables.clone(),
        elapsed_ms: elapsed.as_millis() as u64,
        metrics: Report::snapshot(metrics),
        last_error: error.to_string(),
        tags: sample.tags.clone(),
        conn_info: ConnInfo {
            ip: state.text(StateKey::ConnectionIp).unwrap_or_default().to_string(),
        },
        response_info,
        attachments: state.take_attachments(),
    }
}
