//! Beacon CLI - unified command-line interface.
//!
//! Provides a single binary entry point for:
//! - `beacon provision` - Run the provisioning workflow once
//! - `beacon start` - Provision and run the heartbeat loop until shutdown
//! - `beacon publish` - Provision and send a single device message

mod args;
pub mod commands;

pub use args::{Cli, Commands, ProvisionArgs, PublishArgs, StartArgs};
