use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use hidra_core::{Metric, SampleConfig};
use hidra_runtime::{RunOutcome, StepRecord};
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tracing::{debug, info, warn};

use crate::error::{MetricsError, Result};
use crate::labels::{common_names, common_values, sanitize_label_name, STEP_LABEL};

const CUSTOM_PREFIX: &str = "hidra_custom_";

/// Projects run outcomes onto gauge families in a Prometheus registry.
pub struct MetricsEmitter {
    registry: Registry,
    families: Mutex<Families>,
}

// ── Families ────────────────────────────────────────────────────────

/// A gauge vector plus the label-value tuples currently set on it.
struct Family {
    gauge: GaugeVec,
    series: BTreeSet<Vec<String>>,
}

impl Family {
    fn register(registry: &Registry, name: &str, help: &str, labels: &[String]) -> Result<Self> {
        let names: Vec<&str> = labels.iter().map(String::as_str).collect();
        let gauge = GaugeVec::new(Opts::new(name, help), &names)?;
        registry.register(Box::new(gauge.clone()))?;
        Ok(Self {
            gauge,
            series: BTreeSet::new(),
        })
    }

    fn set(&mut self, values: Vec<String>, value: f64) {
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        self.gauge.with_label_values(&refs).set(value);
        self.series.insert(values);
    }

    /// Drop every series whose first label (`name`) is in `names`.
    fn remove_samples(&mut self, names: &HashSet<&str>) -> usize {
        self.remove_where(|s| s.first().is_some_and(|n| names.contains(n.as_str())))
    }

    fn remove_where(&mut self, doomed: impl Fn(&[String]) -> bool) -> usize {
        let doomed: Vec<Vec<String>> = self.series.iter().filter(|s| doomed(s.as_slice())).cloned().collect();
        for values in &doomed {
            let refs: Vec<&str> = values.iter().map(String::as_str).collect();
            let _ = self.gauge.remove_label_values(&refs);
            self.series.remove(values);
        }
        doomed.len()
    }

    fn unregister(&self, registry: &Registry) {
        if let Err(e) = registry.unregister(Box::new(self.gauge.clone())) {
            warn!(error = %e, "failed to unregister gauge family");
        }
    }
}

struct ScenarioFamilies {
    status: Family,
    elapsed: Family,
    last_run: Family,
    interval: Family,
    step_status: Family,
    step_elapsed: Family,
}

impl ScenarioFamilies {
    fn register(registry: &Registry, tag_keys: &[String]) -> Result<Self> {
        let common = common_names(tag_keys);
        let mut step = common.clone();
        step.push(STEP_LABEL.to_string());

        Ok(Self {
            status: Family::register(
                registry,
                "hidra_sample_metric_status",
                "1 if the last run succeeded, 0 otherwise",
                &common,
            )?,
            elapsed: Family::register(
                registry,
                "hidra_sample_metric_elapsed",
                "Duration of the last run in milliseconds",
                &common,
            )?,
            last_run: Family::register(
                registry,
                "hidra_sample_metric_last_run",
                "Wall clock time of the last run in unix milliseconds",
                &common,
            )?,
            interval: Family::register(
                registry,
                "hidra_sample_metric_interval",
                "Configured sample interval in nanoseconds",
                &common,
            )?,
            step_status: Family::register(
                registry,
                "hidra_step_metric_status",
                "1 if the step succeeded, 0 otherwise",
                &step,
            )?,
            step_elapsed: Family::register(
                registry,
                "hidra_step_metric_elapsed",
                "Duration of the step in milliseconds",
                &step,
            )?,
        })
    }

    fn all_mut(&mut self) -> [&mut Family; 6] {
        [
            &mut self.status,
            &mut self.elapsed,
            &mut self.last_run,
            &mut self.interval,
            &mut self.step_status,
            &mut self.step_elapsed,
        ]
    }

    fn unregister(&self, registry: &Registry) {
        for family in [
            &self.status,
            &self.elapsed,
            &self.last_run,
            &self.interval,
            &self.step_status,
            &self.step_elapsed,
        ] {
            family.unregister(registry);
        }
    }
}

/// A plugin metric family. `keys` are the metric's own label keys, fixed by
/// the first emission.
struct CustomFamily {
    family: Family,
    keys: Vec<String>,
}

struct Families {
    tag_keys: Vec<String>,
    scenario: ScenarioFamilies,
    custom: HashMap<String, CustomFamily>,
}

impl Families {
    fn custom_family(
        &mut self,
        registry: &Registry,
        name: &str,
        metric: &Metric,
    ) -> Result<&mut CustomFamily> {
        if !self.custom.contains_key(name) {
            let keys: Vec<String> = metric.labels.keys().cloned().collect();
            let mut labels = common_names(&self.tag_keys);
            labels.push(STEP_LABEL.to_string());
            for key in &keys {
                let mut label = sanitize_label_name(key);
                while labels.contains(&label) {
                    label = format!("metric_{label}");
                }
                labels.push(label);
            }

            let help = if metric.description.is_empty() {
                format!("Plugin metric {}", metric.name)
            } else {
                metric.description.clone()
            };
            let family = Family::register(registry, name, &help, &labels)?;
            debug!(family = name, labels = ?keys, "registered custom metric family");
            self.custom.insert(name.to_string(), CustomFamily { family, keys });
        }

        let family = self
            .custom
            .get_mut(name)
            .ok_or_else(|| prometheus::Error::Msg(format!("family {name} vanished")))?;
        if !metric.labels.keys().eq(family.keys.iter()) {
            return Err(MetricsError::LabelMismatch {
                family: name.to_string(),
                expected: family.keys.clone(),
                got: metric.labels.keys().cloned().collect(),
            });
        }
        Ok(family)
    }
}

fn custom_family_name(metric: &str) -> String {
    format!("{CUSTOM_PREFIX}{}", sanitize_label_name(metric))
}

/// `step` label value. Samples with several variable scopes prefix the
/// scope index so each scope keeps its own series.
fn step_label(scope: usize, scopes: usize, step: &StepRecord) -> String {
    if scopes > 1 {
        format!("{scope}.{}", step.label())
    } else {
        step.label()
    }
}

fn custom_values(common: &[String], step: &str, metric: &Metric) -> Vec<String> {
    let mut values = common.to_vec();
    values.push(step.to_string());
    values.extend(metric.labels.values().cloned());
    values
}

fn millis(d: std::time::Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

// ── Emitter ─────────────────────────────────────────────────────────

impl MetricsEmitter {
    /// Register the scenario and step families for `tag_keys` in a fresh
    /// registry.
    pub fn new(tag_keys: Vec<String>) -> Result<Self> {
        Self::with_registry(Registry::new(), tag_keys)
    }

    pub fn with_registry(registry: Registry, tag_keys: Vec<String>) -> Result<Self> {
        let scenario = ScenarioFamilies::register(&registry, &tag_keys)?;
        Ok(Self {
            registry,
            families: Mutex::new(Families {
                tag_keys,
                scenario,
                custom: HashMap::new(),
            }),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn tag_keys(&self) -> Vec<String> {
        self.families
            .lock()
            .expect("metrics lock poisoned")
            .tag_keys
            .clone()
    }

    /// Re-register every family when the tag schema changes. Existing series
    /// are dropped; custom families come back lazily on next emission.
    /// Returns whether anything changed.
    pub fn set_tag_schema(&self, tag_keys: Vec<String>) -> Result<bool> {
        let mut families = self.families.lock().expect("metrics lock poisoned");
        if families.tag_keys == tag_keys {
            return Ok(false);
        }

        families.scenario.unregister(&self.registry);
        for custom in families.custom.values() {
            custom.family.unregister(&self.registry);
        }
        families.custom.clear();
        families.scenario = ScenarioFamilies::register(&self.registry, &tag_keys)?;
        info!(tags = ?tag_keys, "metric tag schema changed, families re-registered");
        families.tag_keys = tag_keys;
        Ok(true)
    }

    /// Drop every series belonging to the named samples.
    pub fn remove_samples(&self, names: &[String]) -> usize {
        if names.is_empty() {
            return 0;
        }
        let names: HashSet<&str> = names.iter().map(String::as_str).collect();
        let mut families = self.families.lock().expect("metrics lock poisoned");
        let mut removed = 0;
        for family in families.scenario.all_mut() {
            removed += family.remove_samples(&names);
        }
        for custom in families.custom.values_mut() {
            removed += custom.family.remove_samples(&names);
        }
        debug!(samples = names.len(), series = removed, "removed sample series");
        removed
    }

    /// Drop every series whose sample is not in `loaded`.
    pub fn retain_samples(&self, loaded: &[String]) -> usize {
        let loaded: HashSet<&str> = loaded.iter().map(String::as_str).collect();
        let stale = |s: &[String]| s.first().is_some_and(|n| !loaded.contains(n.as_str()));
        let mut families = self.families.lock().expect("metrics lock poisoned");
        let mut removed = 0;
        for family in families.scenario.all_mut() {
            removed += family.remove_where(stale);
        }
        for custom in families.custom.values_mut() {
            removed += custom.family.remove_where(stale);
        }
        removed
    }

    /// Write the results of one scheduled execution of `sample` (one
    /// outcome per variable scope).
    ///
    /// Every metric is attempted; the first label mismatch or registration
    /// failure is returned after the rest have been written.
    pub fn emit(&self, sample: &SampleConfig, outcomes: &[RunOutcome]) -> Result<()> {
        let mut families = self.families.lock().expect("metrics lock poisoned");
        let common = common_values(sample, &families.tag_keys);

        let success = !outcomes.is_empty() && outcomes.iter().all(RunOutcome::success);
        let elapsed: std::time::Duration = outcomes.iter().map(|o| o.elapsed).sum();
        let now_ms = chrono::Utc::now().timestamp_millis() as f64;

        let scenario = &mut families.scenario;
        scenario.status.set(common.clone(), if success { 1.0 } else { 0.0 });
        scenario.elapsed.set(common.clone(), millis(elapsed));
        scenario.last_run.set(common.clone(), now_ms);
        scenario.interval.set(common.clone(), sample.interval.as_nanos() as f64);

        let scopes = outcomes.len();
        for (scope, outcome) in outcomes.iter().enumerate() {
            for step in &outcome.steps {
                let mut values = common.clone();
                values.push(step_label(scope, scopes, step));
                scenario
                    .step_status
                    .set(values.clone(), if step.success { 1.0 } else { 0.0 });
                scenario.step_elapsed.set(values, millis(step.elapsed));
            }
        }

        // Purge before any of this run's writes. A purging metric drops the
        // series that match it on every label outside its purge keys.
        for (scope, outcome) in outcomes.iter().enumerate() {
            for (step, metrics) in outcome.metrics_by_step() {
                let label = step_label(scope, scopes, step);
                for metric in metrics.iter().filter(|m| m.purge) {
                    let name = custom_family_name(&metric.name);
                    let Some(custom) = families.custom.get_mut(&name) else {
                        continue;
                    };
                    if !metric.labels.keys().eq(custom.keys.iter()) {
                        continue;
                    }
                    let offset = common.len() + 1;
                    let purge_at: Vec<usize> = custom
                        .keys
                        .iter()
                        .enumerate()
                        .filter(|(_, key)| metric.purge_labels.contains(key))
                        .map(|(i, _)| offset + i)
                        .collect();
                    let values = custom_values(&common, &label, metric);
                    custom.family.remove_where(|series| {
                        series
                            .iter()
                            .enumerate()
                            .all(|(i, v)| purge_at.contains(&i) || values.get(i) == Some(v))
                    });
                }
            }
        }

        let mut first_error = None;
        for (scope, outcome) in outcomes.iter().enumerate() {
            for (step, metrics) in outcome.metrics_by_step() {
                let label = step_label(scope, scopes, step);
                for metric in metrics {
                    let name = custom_family_name(&metric.name);
                    let custom = match families.custom_family(&self.registry, &name, metric) {
                        Ok(custom) => custom,
                        Err(e) => {
                            first_error.get_or_insert(e);
                            continue;
                        }
                    };
                    custom.family.set(custom_values(&common, &label, metric), metric.value);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Prometheus text exposition of the registry.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
