use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Synthetic monitoring probe runner and Prometheus exporter.
#[derive(Parser, Debug)]
#[command(name = "hidra", version, about = "Synthetic monitoring probe runner and Prometheus exporter")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run samples on their schedule and expose the results as metrics
    Exporter {
        /// Path to the exporter config file
        #[arg(env = "HIDRA_CONFIG")]
        config_file: PathBuf,
    },
}
