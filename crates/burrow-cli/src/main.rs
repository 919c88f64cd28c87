//! burrow CLI entry point.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use burrow_cli::cmd;
use burrow_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Create {
            path,
            python_version,
        } => cmd::create::create(&path, python_version.as_deref()),
        Commands::Install {
            path,
            specs,
            index_url,
        } => cmd::install::install(&path, &specs, index_url.as_deref()).await,
        Commands::Uninstall {
            path,
            packages,
            index_url,
        } => cmd::uninstall::uninstall(&path, &packages, index_url.as_deref()).await,
        Commands::List { path } => cmd::list::list(&path),
    }
}
