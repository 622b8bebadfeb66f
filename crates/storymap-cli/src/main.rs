//! storymap - rebuild Lark Bitable story records as a validated tree

mod cli;
mod commands;
mod render;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use storymap_core::ClientConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level())),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let mut config = ClientConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Extract { url, output } => {
            commands::extract(&config, &url, output, cli.metrics).await
        }
        Commands::Tree {
            url,
            output,
            mapping,
        } => {
            mapping.apply(&mut config);
            commands::tree(&config, &url, &output, cli.metrics).await
        }
        Commands::Analyze {
            file,
            output,
            mapping,
        } => {
            mapping.apply(&mut config);
            commands::analyze(&config, &file, &output)
        }
        Commands::Check { url } => commands::check(&config, &url, cli.metrics).await,
    }
}
