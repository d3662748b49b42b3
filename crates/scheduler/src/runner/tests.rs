//! Tests for the scheduler loops and workers.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hidra_core::config::{SchedulerConfig, WorkerConfig};
use hidra_core::{Metric, SampleConfig};
use hidra_metrics::MetricsEmitter;
use hidra_runtime::{
    EvaluationState, Plugin, PluginContext, PluginRegistry, SampleRunner, StepDefinition,
    StepError, StepRequest, TaskQueue,
};
use tokio::sync::mpsc;

use super::*;
use crate::loader::{SampleLoader, SampleWatcher};

struct CountingPlugin {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Plugin for CountingPlugin {
    fn name(&self) -> &str {
        "count"
    }

    fn steps(&self) -> BTreeMap<String, StepDefinition> {
        BTreeMap::from([("tick".to_string(), StepDefinition::new("count a run"))])
    }

    async fn run_step(
        &self,
        _ctx: &PluginContext,
        _state: &mut EvaluationState,
        _step: &StepRequest,
        out: &mut Vec<Metric>,
    ) -> Result<(), StepError> {
        let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        out.push(Metric::new("count_runs", n as f64));
        Ok(())
    }
}

const SAMPLE: &str = "interval: 1h\nsteps:\n  - plugin: count\n    action: tick\n";

fn sample(name: &str) -> SampleConfig {
    SampleConfig::from_yaml(Path::new(&format!("/samples/{name}.yml")), SAMPLE).unwrap()
}

fn scheduler(samples: Vec<SampleConfig>, worker: WorkerConfig) -> (Arc<Scheduler>, Arc<AtomicUsize>) {
    let runs = Arc::new(AtomicUsize::new(0));
    let mut registry = PluginRegistry::new();
    registry
        .register(CountingPlugin { runs: runs.clone() })
        .unwrap();
    let (tasks, _drainer) = TaskQueue::start();
    let ctx = PluginContext {
        registry: Arc::new(registry),
        tasks,
    };

    let emitter = Arc::new(MetricsEmitter::new(hidra_metrics::tag_schema(&samples)).unwrap());
    let config = SchedulerConfig {
        refresh_samples_interval: Duration::from_millis(20),
        enqueue_samples_interval: Duration::from_millis(10),
        gc_interval: Duration::from_secs(60),
    };
    let scheduler = Scheduler::new(config, worker, samples, SampleRunner::new(ctx), emitter);
    (Arc::new(scheduler), runs)
}

fn worker(parallel_jobs: usize, max_queue_size: usize) -> WorkerConfig {
    WorkerConfig {
        parallel_jobs,
        max_queue_size,
        sleep_between_jobs: Duration::ZERO,
    }
}

#[tokio::test]
async fn enqueue_skips_samples_already_in_progress() {
    let (scheduler, _) = scheduler(vec![sample("a"), sample("b")], worker(1, 10));
    let (tx, mut rx) = mpsc::channel(10);

    assert_eq!(scheduler.enqueue_due(&tx), 2);
    assert_eq!(scheduler.enqueue_due(&tx), 0);
    assert_eq!(rx.recv().await.unwrap().name, "a");
    assert_eq!(rx.recv().await.unwrap().name, "b");
}

#[tokio::test]
async fn full_queue_releases_the_sample() {
    let (scheduler, _) = scheduler(vec![sample("a"), sample("b")], worker(1, 1));
    let (tx, _rx) = mpsc::channel(1);

    assert_eq!(scheduler.enqueue_due(&tx), 1);
    let state = scheduler.state();
    let state = state.read().unwrap();
    assert!(state.entry("a").unwrap().in_progress);
    assert!(!state.entry("b").unwrap().in_progress);
}

#[tokio::test]
async fn execute_records_run_and_emits_metrics() {
    let web = sample("web");
    let (scheduler, runs) = scheduler(vec![web.clone()], worker(1, 10));
    let (tx, _rx) = mpsc::channel(10);
    scheduler.enqueue_due(&tx);

    let outcomes = scheduler.execute(&web).await;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].success());
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    {
        let state = scheduler.state();
        let state = state.read().unwrap();
        let entry = state.entry("web").unwrap();
        assert!(!entry.in_progress);
        assert!(entry.last_run.is_some());
    }

    let text = scheduler.emitter().encode().unwrap();
    assert!(text.contains("hidra_sample_metric_status{"));
    assert!(text.contains("name=\"web\""));
    assert!(text.contains("hidra_custom_count_runs{"));
}

#[tokio::test]
async fn reload_drops_series_of_removed_samples() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.yml"), SAMPLE).unwrap();
    fs::write(dir.path().join("b.yml"), SAMPLE).unwrap();
    let (mut watcher, samples) =
        SampleWatcher::initial(SampleLoader::new(dir.path()).unwrap()).unwrap();

    let (scheduler, _) = scheduler(samples.clone(), worker(1, 10));
    for sample in &samples {
        scheduler.execute(sample).await;
    }
    assert!(scheduler.emitter().encode().unwrap().contains("name=\"b\""));

    fs::remove_file(dir.path().join("b.yml")).unwrap();
    assert!(scheduler.refresh(&mut watcher));
    assert!(!scheduler.refresh(&mut watcher));

    let text = scheduler.emitter().encode().unwrap();
    assert!(text.contains("name=\"a\""));
    assert!(!text.contains("name=\"b\""));
    let state = scheduler.state();
    assert_eq!(state.read().unwrap().samples().len(), 1);
}

#[tokio::test]
async fn run_outliving_its_sample_leaves_no_series() {
    let (scheduler, runs) = scheduler(vec![sample("a"), sample("b")], worker(1, 10));
    let (tx, _rx) = mpsc::channel(10);
    assert_eq!(scheduler.enqueue_due(&tx), 2);

    scheduler.apply_samples(vec![sample("a")]);
    scheduler.execute(&sample("b")).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!scheduler.emitter().encode().unwrap().contains("name=\"b\""));

    // A write that slipped in after the reload is cleared by the next one.
    scheduler.emitter().emit(&sample("b"), &[]).unwrap();
    assert!(scheduler.emitter().encode().unwrap().contains("name=\"b\""));
    scheduler.apply_samples(vec![sample("a"), sample("c")]);

    let text = scheduler.emitter().encode().unwrap();
    assert!(!text.contains("name=\"b\""));
}

#[tokio::test]
async fn broken_reload_keeps_previous_samples() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.yml"), SAMPLE).unwrap();
    let (mut watcher, samples) =
        SampleWatcher::initial(SampleLoader::new(dir.path()).unwrap()).unwrap();
    let (scheduler, _) = scheduler(samples, worker(1, 10));

    fs::write(dir.path().join("broken.yml"), "steps: [").unwrap();
    assert!(!scheduler.refresh(&mut watcher));
    let state = scheduler.state();
    assert_eq!(state.read().unwrap().samples()[0].name, "a");
}

#[tokio::test]
async fn started_scheduler_runs_each_sample_once_per_interval() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.yml"), SAMPLE).unwrap();
    fs::write(dir.path().join("b.yml"), SAMPLE).unwrap();
    let (watcher, samples) =
        SampleWatcher::initial(SampleLoader::new(dir.path()).unwrap()).unwrap();

    let (scheduler, runs) = scheduler(samples, worker(2, 10));
    let handle = scheduler.start(watcher);
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.shutdown().await;

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    let state = scheduler.state();
    let state = state.read().unwrap();
    assert!(state.samples().iter().all(|s| {
        let entry = state.entry(&s.name).unwrap();
        entry.last_run.is_some() && !entry.in_progress
    }));
}
