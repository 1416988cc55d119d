//! sluice - operator execution core for a streaming dataflow engine.
//!
//! sluice drives a graph of physical operators that submit work to a remote
//! execution substrate, exchange block bundles, and report resource usage to
//! a scheduler that applies backpressure.

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

// Re-export member crates
pub use common_config as config;
pub use common_display as display;
pub use common_error as error;
pub use sluice_execution as execution;

/// sluice version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
