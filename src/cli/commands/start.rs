//! Start command - provisions the device and runs the heartbeat loop.

use crate::cli::args::StartArgs;
use crate::cli::commands::provision::{build_provisioner, load_and_init};
use crate::heartbeat::HeartbeatPublisher;
use crate::time::SystemClock;
use crate::transport::Session;
use anyhow::Result;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

/// Wait for shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() -> &'static str {
    let mut sigint = signal(SignalKind::interrupt()).expect("register SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("register SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}

pub async fn run_start(args: StartArgs) -> Result<()> {
    let config = load_and_init(&args.config)?;
    let provisioner = build_provisioner(&config)?;

    let provisioned = tokio::select! {
        biased;
        sig = shutdown_signal() => {
            info!("received {sig} during provisioning, aborting");
            return Ok(());
        }
        outcome = provisioner.run() => outcome?,
    };

    let publisher = HeartbeatPublisher::new(
        Arc::clone(&provisioned.session),
        provisioned.identity.clone(),
        config.heartbeat.interval(),
        SystemClock,
    );
    publisher.start();

    let sig = shutdown_signal().await;
    info!("received {sig}, shutting down");
    publisher.stop().await;
    info!(
        "published {} automatic heartbeats this run",
        publisher.snapshot().sequence
    );
    if let Err(err) = provisioned.session.disconnect().await {
        warn!("operational link close failed: {err}");
    }
    Ok(())
}
