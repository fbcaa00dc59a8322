//! Mixdeck CLI
//!
//! Offline renders and timeline tooling from the command line.

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use mixdeck::cli::{commands, Cli, Commands};
use mixdeck::EngineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    debug!("Mixdeck v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Render {
            timeline,
            sources,
            out,
            format,
            bitrate,
        } => {
            let config = EngineConfig::from_env();
            commands::render(&config, &timeline, &sources, &out, &format, bitrate).await?;
        }
        Commands::Info { path } => {
            commands::info(&path)?;
        }
        Commands::Place {
            timeline,
            track,
            start,
            duration,
        } => {
            commands::place(&timeline, &track, start, duration)?;
        }
    }
    Ok(())
}
