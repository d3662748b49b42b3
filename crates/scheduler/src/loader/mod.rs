//! Filesystem sample loader with polling change detection.
//!
//! Scans the samples directory recursively for `*.yml` / `*.yaml` files.
//! The watcher compares the sorted path list on each poll and reloads the
//! whole set when it changes.

mod core;
mod error;
mod watcher;

#[cfg(test)]
mod tests;

pub use self::core::SampleLoader;
pub use self::error::{LoadError, Result};
pub use self::watcher::SampleWatcher;
