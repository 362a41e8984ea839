//! Operations and observability.
//!
//! This module provides operational tooling:
//! - `telemetry` - Structured logging setup

pub mod telemetry;

pub use telemetry::*;
