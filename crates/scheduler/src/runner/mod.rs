//! Scheduler runner: the tick, watcher and GC loops plus the worker pool.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, constructor, handle and accessors
//! - `execution`: tick, reload and GC loops
//! - `worker`: job consumers that run samples and emit metrics

mod core;
mod execution;
mod worker;
#[cfg(test)]
mod tests;

pub use self::core::{Scheduler, SchedulerHandle};
