//! Report sink: fans failed runs out to the configured destinations.
//!
//! Each destination implements [`ReportDestination`]. [`ReportSink`]
//! attempts all of them for every report and plugs into the sample runner
//! as its [`hidra_runtime::Reporter`].

pub mod callback;
pub mod error;
pub mod file;
pub mod s3;
pub mod sink;
pub mod traits;

pub use callback::CallbackDestination;
pub use error::ReportError;
pub use file::FileDestination;
pub use s3::S3Destination;
pub use sink::ReportSink;
pub use traits::ReportDestination;
