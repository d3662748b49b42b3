//! The `hidra` exporter: wires the plugin registry, scheduler, metrics
//! emitter and report sink together and serves the Prometheus endpoint.

pub mod app;
pub mod cli;
pub mod server;

pub use app::{Exporter, RunningExporter};
pub use cli::{Cli, Command};
pub use server::{router, shutdown_signal};
