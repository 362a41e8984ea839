//! Publish command - provisions the device and sends one message.

use crate::cli::args::PublishArgs;
use crate::cli::commands::provision::{build_provisioner, load_and_init};
use crate::heartbeat::HeartbeatPublisher;
use crate::time::SystemClock;
use crate::transport::Session;
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::warn;

pub async fn run_publish(args: PublishArgs) -> Result<()> {
    let config = load_and_init(&args.config)?;
    let provisioner = build_provisioner(&config)?;
    let provisioned = provisioner.run().await?;

    let publisher = HeartbeatPublisher::new(
        Arc::clone(&provisioned.session),
        provisioned.identity.clone(),
        config.heartbeat.interval(),
        SystemClock,
    );

    match args.message {
        Some(raw) => {
            let payload: serde_json::Value =
                serde_json::from_str(&raw).context("parse --message as JSON")?;
            if !payload.is_object() {
                bail!("--message must be a JSON object");
            }
            let sent = publisher.publish_custom(&args.suffix, payload).await?;
            println!("{sent}");
        }
        None => {
            publisher.publish_now().await?;
            eprintln!("manual heartbeat sent");
        }
    }

    if let Err(err) = provisioned.session.disconnect().await {
        warn!("operational link close failed: {err}");
    }
    Ok(())
}
