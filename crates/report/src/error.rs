use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("callback {url} answered {status}")]
    CallbackStatus { url: String, status: u16 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{destination} destination failed: {source}")]
    Destination {
        destination: String,
        source: Box<ReportError>,
    },
}
