use clap::Parser;
use hidra_core::ExporterConfig;
use hidra_exporter::{Cli, Command, Exporter};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hidra_core::config::load_dotenv();
    let cli = Cli::parse();

    match cli.command {
        Command::Exporter { config_file } => {
            let config = ExporterConfig::load(&config_file)?;

            let filter = EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.log_level))
                .unwrap_or_else(|_| EnvFilter::new("info"));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_level(true)
                .init();

            tracing::info!("hidra v{} starting", env!("CARGO_PKG_VERSION"));
            config.log_summary();

            Exporter::build(config)?.run().await?;
            tracing::info!("hidra exited cleanly");
        }
    }
    Ok(())
}
