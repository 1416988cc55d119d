//! Execution infrastructure.
//!
//! - [`ExecutionContext`]: configuration and substrate shared by operators
//! - [`StreamingExecutor`]: single-threaded driver loop
//! - [`ExecutionResult`]: output bundles and metrics of a run

mod context;
mod result;
mod streaming;

pub use context::ExecutionContext;
pub use result::ExecutionResult;
pub use streaming::StreamingExecutor;
