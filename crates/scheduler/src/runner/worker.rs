use std::sync::Arc;
use std::time::Duration;

use hidra_core::SampleConfig;
use hidra_runtime::RunOutcome;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::core::{JobReceiver, Scheduler};

impl Scheduler {
    pub(super) async fn worker_loop(self: Arc<Self>, id: usize, rx: JobReceiver) {
        debug!(worker = id, "worker started");
        loop {
            let job = rx.lock().await.recv().await;
            let Some(sample) = job else {
                break;
            };
            self.execute(&sample).await;

            if !self.worker.sleep_between_jobs.is_zero() {
                tokio::time::sleep(self.worker.sleep_between_jobs).await;
            }
        }
        debug!(worker = id, "worker stopped");
    }

    /// Run every variable scope of `sample`, emit metrics and account the
    /// run in the shared state. Samples dropped by a reload while running
    /// are not emitted.
    pub async fn execute(&self, sample: &SampleConfig) -> Vec<RunOutcome> {
        let mut outcomes = Vec::new();
        for scope in sample.scopes() {
            outcomes.push(self.runner.run(sample, &scope).await);
        }
        let elapsed: Duration = outcomes.iter().map(|o| o.busy).sum();

        let loaded = self
            .state
            .read()
            .expect("scheduler state lock poisoned")
            .is_loaded(&sample.name);
        if loaded {
            if let Err(e) = self.emitter.emit(sample, &outcomes) {
                warn!(sample = %sample.name, error = %e, "failed to emit metrics");
            }
        } else {
            debug!(sample = %sample.name, "sample unloaded during run, skipping metrics");
        }
        self.state
            .write()
            .expect("scheduler state lock poisoned")
            .finish_run(&sample.name, elapsed, Instant::now());

        let elapsed_ms = elapsed.as_millis() as u64;
        match outcomes.iter().find_map(|o| o.error.as_ref()) {
            None => debug!(sample = %sample.name, elapsed_ms, "sample run succeeded"),
            Some(e) => info!(
                sample = %sample.name,
                elapsed_ms,
                kind = %e.kind(),
                error = %e,
                "sample run failed"
            ),
        }
        outcomes
    }
}
