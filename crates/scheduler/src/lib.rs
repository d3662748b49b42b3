//! Sample scheduling: discovery, the due/penalty decision, and the worker
//! pool that executes samples.
//!
//! Data flow: [`SampleWatcher`] feeds [`SchedulerState`]; the scheduler tick
//! pushes due samples onto a bounded job channel; workers drain it through
//! the sample runner and project results through the metrics emitter.

pub mod loader;
pub mod runner;
pub mod state;

pub use loader::{LoadError, SampleLoader, SampleWatcher};
pub use runner::{Scheduler, SchedulerHandle};
pub use state::{Decision, SampleEntry, SchedulerState, SharedSchedulerState, SkipReason};
