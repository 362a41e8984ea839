//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Beacon - MQTT device provisioning and heartbeat agent.
#[derive(Parser)]
#[command(name = "beacon")]
#[command(version)]
#[command(about = "Beacon device provisioning agent")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the provisioning workflow once and print the assigned identity
    Provision(ProvisionArgs),

    /// Provision, then keep the operational session alive with heartbeats
    Start(StartArgs),

    /// Provision, publish one message on a device topic, and exit
    Publish(PublishArgs),
}

// -----------------------------------------------------------------------------
// Provision command
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct ProvisionArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/beacon.toml")]
    pub config: PathBuf,
}

// -----------------------------------------------------------------------------
// Start command
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct StartArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/beacon.toml")]
    pub config: PathBuf,
}

// -----------------------------------------------------------------------------
// Publish command (one-shot device message)
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct PublishArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/beacon.toml")]
    pub config: PathBuf,

    /// Device topic suffix to publish on (devices/<thing>/<suffix>)
    #[arg(long, default_value = "heartbeat")]
    pub suffix: String,

    /// JSON object payload; sends a manual heartbeat when omitted
    #[arg(long)]
    pub message: Option<String>,
}
