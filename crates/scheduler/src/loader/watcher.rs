//! Polling change detection over the discovered path list.

use std::path::PathBuf;

use hidra_core::SampleConfig;
use tracing::info;

use super::core::SampleLoader;
use super::error::Result;

/// Remembers the last successfully loaded path list.
#[derive(Debug)]
pub struct SampleWatcher {
    loader: SampleLoader,
    snapshot: Vec<PathBuf>,
}

impl SampleWatcher {
    /// Start watching from an already loaded `snapshot`.
    pub fn new(loader: SampleLoader, snapshot: Vec<PathBuf>) -> Self {
        Self { loader, snapshot }
    }

    /// Discover and load the initial sample set.
    pub fn initial(loader: SampleLoader) -> Result<(Self, Vec<SampleConfig>)> {
        let paths = loader.discover()?;
        let samples = loader.load_paths(&paths)?;
        Ok((Self::new(loader, paths), samples))
    }

    pub fn snapshot(&self) -> &[PathBuf] {
        &self.snapshot
    }

    /// Returns the new sample set when the path list changed.
    ///
    /// On a load error the snapshot is left untouched, so the next poll
    /// retries.
    pub fn poll(&mut self) -> Result<Option<Vec<SampleConfig>>> {
        let paths = self.loader.discover()?;
        if paths == self.snapshot {
            return Ok(None);
        }

        let samples = self.loader.load_paths(&paths)?;
        info!(
            before = self.snapshot.len(),
            after = paths.len(),
            "sample file set changed"
        );
        self.snapshot = paths;
        Ok(Some(samples))
    }
}
