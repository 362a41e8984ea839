//! CLI command implementations.

mod provision;
mod publish;
mod start;

pub use provision::run_provision;
pub use publish::run_publish;
pub use start::run_start;
