use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("label mismatch for {family}: registered {expected:?}, got {got:?}")]
    LabelMismatch {
        family: String,
        expected: Vec<String>,
        got: Vec<String>,
    },

    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("exposition is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, MetricsError>;
