//! Beacon - unified CLI entrypoint.
//!
//! Usage:
//!   beacon provision --config config/beacon.toml
//!   beacon start --config config/beacon.toml
//!   beacon publish --suffix status --message '{"battery":97}'

use anyhow::Result;
use beacon::cli::commands::{run_provision, run_publish, run_start};
use beacon::cli::{Cli, Commands};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Provision(args) => run_provision(args).await,
        Commands::Start(args) => run_start(args).await,
        Commands::Publish(args) => run_publish(args).await,
    }
}
