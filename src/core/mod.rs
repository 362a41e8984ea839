//! Core agent infrastructure.
//!
//! This module contains the foundation shared by every component:
//! - `config` - Configuration parsing and validation
//! - `time` - Deterministic time utilities

pub mod config;
pub mod time;

pub use config::*;
pub use time::*;
