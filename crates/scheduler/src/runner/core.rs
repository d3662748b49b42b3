use std::sync::Arc;

use hidra_core::config::{SchedulerConfig, WorkerConfig};
use hidra_core::SampleConfig;
use hidra_metrics::MetricsEmitter;
use hidra_runtime::SampleRunner;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::loader::SampleWatcher;
use crate::state::{SchedulerState, SharedSchedulerState};

pub(super) type JobSender = mpsc::Sender<Arc<SampleConfig>>;
pub(super) type JobReceiver = Arc<Mutex<mpsc::Receiver<Arc<SampleConfig>>>>;

/// Owns the shared state and everything a worker needs to execute a sample.
pub struct Scheduler {
    pub(super) config: SchedulerConfig,
    pub(super) worker: WorkerConfig,
    pub(super) state: SharedSchedulerState,
    pub(super) runner: Arc<SampleRunner>,
    pub(super) emitter: Arc<MetricsEmitter>,
    pub(super) shutdown: watch::Sender<bool>,
}

/// Join handles for a started scheduler.
pub struct SchedulerHandle {
    scheduler: Arc<Scheduler>,
    loops: Vec<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        worker: WorkerConfig,
        samples: Vec<SampleConfig>,
        runner: SampleRunner,
        emitter: Arc<MetricsEmitter>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            worker,
            state: SchedulerState::new(samples).shared(),
            runner: Arc::new(runner),
            emitter,
            shutdown,
        }
    }

    /// Get a handle to the shared scheduler state.
    pub fn state(&self) -> SharedSchedulerState {
        Arc::clone(&self.state)
    }

    pub fn emitter(&self) -> &Arc<MetricsEmitter> {
        &self.emitter
    }

    /// Spawn the worker pool and the tick, watcher and GC loops.
    pub fn start(self: &Arc<Self>, watcher: SampleWatcher) -> SchedulerHandle {
        let (tx, rx) = mpsc::channel(self.worker.max_queue_size.max(1));
        let rx: JobReceiver = Arc::new(Mutex::new(rx));

        let workers = (0..self.worker.parallel_jobs.max(1))
            .map(|id| tokio::spawn(Arc::clone(self).worker_loop(id, Arc::clone(&rx))))
            .collect();

        let loops = vec![
            tokio::spawn(Arc::clone(self).tick_loop(tx, self.shutdown.subscribe())),
            tokio::spawn(Arc::clone(self).watch_loop(watcher, self.shutdown.subscribe())),
            tokio::spawn(Arc::clone(self).gc_loop(self.shutdown.subscribe())),
        ];

        info!(
            workers = self.worker.parallel_jobs.max(1),
            queue = self.worker.max_queue_size,
            samples = self.state.read().expect("scheduler state lock poisoned").samples().len(),
            "scheduler started"
        );
        SchedulerHandle {
            scheduler: Arc::clone(self),
            loops,
            workers,
        }
    }

    /// Signal the loops to stop. Workers exit once the queue is drained.
    pub fn shutdown(&self) {
        info!("scheduler shutdown requested");
        self.shutdown.send_replace(true);
    }
}

impl SchedulerHandle {
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Stop scheduling, close the job channel and wait for workers to drain.
    pub async fn shutdown(self) {
        self.scheduler.shutdown();
        for handle in self.loops {
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduler loop panicked");
            }
        }
        for handle in self.workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker panicked");
            }
        }
        info!("scheduler stopped");
    }
}
