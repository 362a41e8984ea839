//! Provision command - runs the workflow once and prints the identity.

use crate::cli::args::ProvisionArgs;
use crate::config::Config;
use crate::provisioning::{Provisioner, ProvisioningPlan};
use crate::telemetry;
use crate::time::SystemClock;
use crate::transport::{MqttConnector, MqttSettings, Session};
use anyhow::Result;
use std::env;
use std::path::Path;

/// Load configuration and bring up logging. Shared by all commands.
pub(crate) fn load_and_init(config_path: &Path) -> Result<Config> {
    // Set config path via environment so Config::load_from_env picks it up
    env::set_var("BEACON_CONFIG", config_path.display().to_string());

    let config = Config::load_from_env()?;
    telemetry::init_tracing(config.telemetry.log_level.as_deref())?;
    config.validate()?;
    Ok(config)
}

pub(crate) fn build_provisioner(
    config: &Config,
) -> Result<Provisioner<MqttConnector, SystemClock>> {
    let claim = MqttConnector::new(MqttSettings::for_claim(config))?;
    let operational = MqttConnector::new(MqttSettings::for_operational(config))?;
    let plan = ProvisioningPlan::from_config(config);
    Ok(Provisioner::new(claim, operational, plan, SystemClock))
}

pub async fn run_provision(args: ProvisionArgs) -> Result<()> {
    let config = load_and_init(&args.config)?;
    let provisioner = build_provisioner(&config)?;

    // Progress to stderr, final identity to stdout.
    let mut states = provisioner.watch_state();
    let progress = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            eprintln!("{}", *states.borrow());
        }
    });

    let outcome = provisioner.run().await;
    progress.abort();
    let provisioned = outcome?;

    println!(
        "{}",
        serde_json::json!({
            "device_id": provisioned.identity.device_id,
            "thing_name": provisioned.identity.thing_name,
        })
    );
    provisioned.session.disconnect().await?;
    Ok(())
}
