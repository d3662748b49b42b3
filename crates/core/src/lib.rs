pub mod config;
pub mod duration;
pub mod error;
pub mod metric;
pub mod report;
pub mod sample;

pub use config::ExporterConfig;
pub use error::{ConfigError, Result};
pub use metric::Metric;
pub use report::{ConnInfo, Report, ResponseInfo};
pub use sample::{SampleConfig, StepConfig};
