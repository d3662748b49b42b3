//! Error types for sample discovery and loading.

use std::path::PathBuf;

use hidra_core::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The configured samples directory does not exist or is not a directory.
    #[error("samples directory not found: {0}")]
    NotFound(PathBuf),

    /// Directory traversal failed.
    #[error("failed to scan {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// A sample file failed to parse or validate, or names collide.
    #[error(transparent)]
    Sample(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, LoadError>;
