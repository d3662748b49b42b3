use std::path::PathBuf;

/// Errors raised while reading the exporter config or sample definitions.
///
/// All of these are fatal at startup. During a sample reload they are
/// logged and the previously loaded set is kept.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid duration '{input}': {reason}")]
    InvalidDuration { input: String, reason: String },

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("duplicate sample name '{name}' in {first} and {second}")]
    DuplicateSample {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("samples directory not found: {0}")]
    SamplesDirNotFound(PathBuf),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
