//! Core [`SampleLoader`]: directory scan and validated loading.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use hidra_core::{ConfigError, SampleConfig};
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use super::error::{LoadError, Result};

/// Loads every sample file under a directory tree.
#[derive(Debug, Clone)]
pub struct SampleLoader {
    samples_dir: PathBuf,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|n| n.starts_with('.'))
            .unwrap_or(false)
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e == "yml" || e == "yaml")
        .unwrap_or(false)
}

impl SampleLoader {
    /// Create a loader for `samples_dir`, which must be an existing directory.
    pub fn new(samples_dir: impl Into<PathBuf>) -> Result<Self> {
        let samples_dir = samples_dir.into();
        if !samples_dir.is_dir() {
            return Err(LoadError::NotFound(samples_dir));
        }
        Ok(Self { samples_dir })
    }

    pub fn samples_dir(&self) -> &Path {
        &self.samples_dir
    }

    /// Sorted list of sample file paths. Dotfiles and dot-directories are
    /// skipped.
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.samples_dir)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| !is_hidden(e))
        {
            let entry = entry.map_err(|source| LoadError::Walk {
                path: self.samples_dir.clone(),
                source,
            })?;
            if entry.file_type().is_file() && is_yaml(entry.path()) {
                paths.push(entry.into_path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Parse every discovered file. Any invalid file or duplicate name fails
    /// the whole load.
    pub fn load_all(&self) -> Result<Vec<SampleConfig>> {
        let paths = self.discover()?;
        self.load_paths(&paths)
    }

    pub(super) fn load_paths(&self, paths: &[PathBuf]) -> Result<Vec<SampleConfig>> {
        let mut seen: HashMap<String, PathBuf> = HashMap::new();
        let mut samples = Vec::with_capacity(paths.len());

        for path in paths {
            let sample = SampleConfig::load(path)?;
            if let Some(first) = seen.get(&sample.name) {
                return Err(ConfigError::DuplicateSample {
                    name: sample.name,
                    first: first.clone(),
                    second: path.clone(),
                }
                .into());
            }
            debug!(sample = %sample.name, path = %path.display(), kind = sample.kind(), "loaded sample");
            seen.insert(sample.name.clone(), path.clone());
            samples.push(sample);
        }

        info!(
            dir = %self.samples_dir.display(),
            count = samples.len(),
            "samples loaded"
        );
        Ok(samples)
    }
}
