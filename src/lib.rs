#![deny(unused, dead_code)]
#![deny(clippy::all, clippy::pedantic)]
// Module naming: common pattern in domain-driven code
#![allow(clippy::module_name_repetitions)]
// Function complexity: some functions are inherently complex
#![allow(clippy::too_many_lines)]
#![allow(clippy::too_many_arguments)]
// Variable naming: domain terms often similar
#![allow(clippy::similar_names)]
// Documentation style: many terms don't need backticks
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// API ergonomics: prefer simplicity over must_use annotations
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
// Format strings: allow non-inlined for readability
#![allow(clippy::uninlined_format_args)]
// Import style
#![allow(clippy::wildcard_imports)]
// Struct field patterns
#![allow(clippy::struct_field_names)]
// Numeric casts: intentional in protocol code
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_lossless)]
// Control flow style
#![allow(clippy::if_not_else)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::single_match_else)]
#![allow(clippy::match_wildcard_for_single_variants)]
#![allow(clippy::manual_let_else)]
// Passing style
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::trivially_copy_pass_by_ref)]
// Self usage
#![allow(clippy::unused_self)]
#![allow(clippy::used_underscore_binding)]
// Clone/assign patterns
#![allow(clippy::assigning_clones)]
// Option/Result patterns
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::map_unwrap_or)]
// Type defaults
#![allow(clippy::default_trait_access)]
// Closure style
#![allow(clippy::redundant_closure_for_method_calls)]
// Unit patterns
#![allow(clippy::ignored_unit_patterns)]
// Large types
#![allow(clippy::large_futures)]
#![allow(clippy::large_enum_variant)]
// Explicit type bounds
#![allow(clippy::significant_drop_tightening)]
// Copy vs clone style
#![allow(clippy::cloned_instead_of_copied)]
// String conversion efficiency
#![allow(clippy::inefficient_to_string)]
// Error handling style
#![allow(clippy::result_large_err)]
// Explicit returns
#![allow(clippy::needless_return)]
#![allow(clippy::semicolon_if_nothing_returned)]
// Cast wrapping
#![allow(clippy::cast_possible_wrap)]
// Iteration style
#![allow(clippy::explicit_iter_loop)]
// Async functions that may not await yet
#![allow(clippy::unused_async)]

//! Beacon - MQTT device provisioning and heartbeat agent.
//!
//! # Module Organization
//!
//! ## Core
//! - `core::config` - Configuration parsing and validation
//! - `core::time` - Deterministic time utilities
//!
//! ## Transport
//! - `transport` - Connector/session traits and topic matching
//! - `transport::mqtt` - rumqttc-backed MQTT sessions
//! - `transport::tls` - mTLS client configuration
//!
//! ## Provisioning
//! - `provisioning::wire` - Request and response payload shapes
//! - `provisioning::correlate` - Correlated request/response exchanges
//! - `provisioning::workflow` - Claim-to-operational state machine
//!
//! ## Heartbeat
//! - `heartbeat` - Periodic liveness publishing
//!
//! ## Operations
//! - `ops::telemetry` - Structured logging setup
//!
//! ## CLI
//! - `cli` - Unified command-line interface

// Core infrastructure
pub mod core;

// Transport
pub mod transport;

// Provisioning
pub mod provisioning;

// Heartbeat
pub mod heartbeat;

// Operations
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, time};
pub use ops::telemetry;
pub use provisioning::{correlate, wire, workflow};
