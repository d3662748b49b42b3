//! Prometheus projection of sample runs.
//!
//! Scenario and step gauges share a common label schema made of the fixed
//! sample labels plus the union of tag keys across the loaded samples.
//! Plugin metrics land in lazily registered `hidra_custom_<name>` families.

pub mod emitter;
pub mod error;
pub mod labels;

pub use emitter::MetricsEmitter;
pub use error::{MetricsError, Result};
pub use labels::{sanitize_label_name, tag_schema};
