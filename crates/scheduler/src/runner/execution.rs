use std::sync::Arc;

use hidra_core::SampleConfig;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::loader::SampleWatcher;

use super::core::{JobSender, Scheduler};

impl Scheduler {
    /// Decide every sample and push the due ones onto the job queue.
    /// Returns how many were queued.
    pub fn enqueue_due(&self, tx: &JobSender) -> usize {
        let mut state = self.state.write().expect("scheduler state lock poisoned");
        let due = state.due_samples(Instant::now());
        let mut queued = 0;

        for sample in due {
            match tx.try_send(sample) {
                Ok(()) => queued += 1,
                Err(TrySendError::Full(sample)) => {
                    warn!(sample = %sample.name, "job queue full, retrying next tick");
                    state.release(&sample.name);
                }
                Err(TrySendError::Closed(sample)) => {
                    state.release(&sample.name);
                }
            }
        }

        if queued > 0 {
            debug!(queued, "samples enqueued");
        }
        queued
    }

    /// Install a freshly loaded sample set. Series of samples outside the
    /// new set are dropped; a changed tag schema re-registers every metric
    /// family.
    pub fn apply_samples(&self, samples: Vec<SampleConfig>) {
        let count = samples.len();
        let (removed, loaded, tag_keys) = {
            let mut state = self.state.write().expect("scheduler state lock poisoned");
            let removed = state.replace_samples(samples);
            let loaded: Vec<String> = state.samples().iter().map(|s| s.name.clone()).collect();
            (removed, loaded, state.tag_keys().to_vec())
        };

        match self.emitter.set_tag_schema(tag_keys) {
            Ok(true) => {}
            Ok(false) => {
                let series = self.emitter.retain_samples(&loaded);
                debug!(series, "dropped series of unloaded samples");
            }
            Err(e) => error!(error = %e, "failed to re-register metric families"),
        }
        info!(samples = count, removed = removed.len(), "sample set reloaded");
    }

    /// Poll the watcher once. Load errors keep the current set.
    pub fn refresh(&self, watcher: &mut SampleWatcher) -> bool {
        match watcher.poll() {
            Ok(Some(samples)) => {
                self.apply_samples(samples);
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!(error = %e, "sample reload failed, keeping previous set");
                false
            }
        }
    }

    pub(super) async fn tick_loop(self: Arc<Self>, tx: JobSender, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.enqueue_samples_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.enqueue_due(&tx);
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("scheduler tick loop stopped");
    }

    pub(super) async fn watch_loop(
        self: Arc<Self>,
        mut watcher: SampleWatcher,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let period = self.config.refresh_samples_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.refresh(&mut watcher);
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("sample watcher stopped");
    }

    pub(super) async fn gc_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.gc_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let pruned = self.state.write().expect("scheduler state lock poisoned").gc();
                    debug!(pruned, "running-time window reset");
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("gc loop stopped");
    }
}
