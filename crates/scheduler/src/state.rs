//! Process-wide scheduling bookkeeping and the due/penalty decision.
//!
//! A single [`SchedulerState`] sits behind a reader/writer lock. The tick
//! takes the write lock to decide and mark samples in progress; workers take
//! it briefly when a run finishes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use hidra_core::SampleConfig;
use tokio::time::Instant;
use tracing::{debug, info};

/// Running-time z-score above which a sample is penalized.
pub const PENALTY_Z_THRESHOLD: f64 = 2.0;

pub type SharedSchedulerState = Arc<RwLock<SchedulerState>>;

// ── Per-sample entry ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleEntry {
    pub last_run: Option<Instant>,
    pub in_progress: bool,
    /// Accumulated run time in milliseconds since the last GC.
    pub running_time_ms: u64,
    /// Extra delay added to the interval until it expires.
    pub penalty: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkipReason {
    InProgress,
    NotDue,
    Penalized,
    PenaltyApplied(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Schedule,
    Skip(SkipReason),
}

/// Mean and population standard deviation of running times.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunningStats {
    pub mean: f64,
    pub stddev: f64,
}

impl RunningStats {
    /// `stddev == 0` gives `z = 0`.
    pub fn z_score(&self, value: f64) -> f64 {
        if self.stddev == 0.0 {
            0.0
        } else {
            (value - self.mean) / self.stddev
        }
    }
}

// ── Scheduler state ─────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SchedulerState {
    samples: Vec<Arc<SampleConfig>>,
    entries: HashMap<String, SampleEntry>,
    running_time_total_ms: u64,
    tag_keys: Vec<String>,
}

impl SchedulerState {
    pub fn new(samples: Vec<SampleConfig>) -> Self {
        let mut state = Self::default();
        state.replace_samples(samples);
        state
    }

    pub fn shared(self) -> SharedSchedulerState {
        Arc::new(RwLock::new(self))
    }

    pub fn samples(&self) -> &[Arc<SampleConfig>] {
        &self.samples
    }

    /// Union of tag label names across the loaded samples.
    pub fn tag_keys(&self) -> &[String] {
        &self.tag_keys
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.samples.iter().any(|s| s.name == name)
    }

    pub fn entry(&self, name: &str) -> Option<&SampleEntry> {
        self.entries.get(name)
    }

    pub fn running_time_total_ms(&self) -> u64 {
        self.running_time_total_ms
    }

    /// Swap in a new sample set and recompute the tag schema. Bookkeeping
    /// for samples that survive is kept. Returns the names that disappeared.
    pub fn replace_samples(&mut self, samples: Vec<SampleConfig>) -> Vec<String> {
        let removed: Vec<String> = self
            .samples
            .iter()
            .filter(|old| !samples.iter().any(|s| s.name == old.name))
            .map(|old| old.name.clone())
            .collect();

        self.tag_keys = hidra_metrics::tag_schema(&samples);
        for sample in &samples {
            self.entries.entry(sample.name.clone()).or_default();
        }
        self.samples = samples.into_iter().map(Arc::new).collect();
        removed
    }

    /// Running-time statistics over the loaded samples.
    pub fn running_stats(&self) -> RunningStats {
        if self.samples.is_empty() {
            return RunningStats::default();
        }
        let values: Vec<f64> = self
            .samples
            .iter()
            .map(|s| {
                self.entries
                    .get(&s.name)
                    .map(|e| e.running_time_ms as f64)
                    .unwrap_or_default()
            })
            .collect();
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        RunningStats {
            mean,
            stddev: variance.sqrt(),
        }
    }

    /// Apply the decision procedure to one sample. May record or clear its
    /// penalty; never marks it in progress.
    pub fn decide(&mut self, sample: &SampleConfig, now: Instant, stats: RunningStats) -> Decision {
        let entry = self.entries.entry(sample.name.clone()).or_default();

        if entry.in_progress {
            return Decision::Skip(SkipReason::InProgress);
        }
        let Some(last_run) = entry.last_run else {
            return Decision::Schedule;
        };

        let since = now.saturating_duration_since(last_run);
        if since < sample.interval {
            return Decision::Skip(SkipReason::NotDue);
        }
        if let Some(penalty) = entry.penalty {
            if since < sample.interval + penalty {
                return Decision::Skip(SkipReason::Penalized);
            }
            entry.penalty = None;
            debug!(sample = %sample.name, "penalty expired");
            return Decision::Schedule;
        }

        let z = stats.z_score(entry.running_time_ms as f64);
        if z > PENALTY_Z_THRESHOLD {
            let penalty = sample.interval.mul_f64(z.round());
            entry.penalty = Some(penalty);
            info!(
                sample = %sample.name,
                z_score = z,
                penalty_ms = penalty.as_millis() as u64,
                "slow sample penalized"
            );
            return Decision::Skip(SkipReason::PenaltyApplied(penalty));
        }
        Decision::Schedule
    }

    /// Decide every loaded sample in list order and mark the due ones in
    /// progress.
    pub fn due_samples(&mut self, now: Instant) -> Vec<Arc<SampleConfig>> {
        let stats = self.running_stats();
        let samples = self.samples.clone();
        let mut due = Vec::new();
        for sample in samples {
            if self.decide(&sample, now, stats) == Decision::Schedule {
                if let Some(entry) = self.entries.get_mut(&sample.name) {
                    entry.in_progress = true;
                }
                due.push(sample);
            }
        }
        due
    }

    /// Clear the in-progress flag without recording a run.
    pub fn release(&mut self, name: &str) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.in_progress = false;
        }
    }

    /// Account a finished run.
    pub fn finish_run(&mut self, name: &str, elapsed: Duration, now: Instant) {
        let elapsed_ms = elapsed.as_millis() as u64;
        let entry = self.entries.entry(name.to_string()).or_default();
        entry.running_time_ms += elapsed_ms;
        entry.last_run = Some(now);
        entry.in_progress = false;
        self.running_time_total_ms += elapsed_ms;
    }

    /// Reset running-time counters and drop bookkeeping for samples that are
    /// no longer loaded, unless a run of theirs is still in flight.
    pub fn gc(&mut self) -> usize {
        let before = self.entries.len();
        let loaded: Vec<&str> = self.samples.iter().map(|s| s.name.as_str()).collect();
        self.entries
            .retain(|name, entry| entry.in_progress || loaded.contains(&name.as_str()));
        for entry in self.entries.values_mut() {
            entry.running_time_ms = 0;
        }
        self.running_time_total_ms = 0;
        before - self.entries.len()
    }
}
