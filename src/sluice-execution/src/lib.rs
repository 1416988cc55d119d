//! Physical operator execution core for sluice.
//!
//! This crate turns a graph of physical operators into running work: each
//! operator ingests upstream bundles, submits tasks to an execution
//! substrate, tracks them until they finish, and reports resource usage so
//! a driver can apply backpressure.

#![allow(clippy::missing_const_for_fn)] // Builder patterns often can't be const
#![allow(clippy::return_self_not_must_use)] // Builder patterns don't always need must_use
#![allow(clippy::doc_markdown)] // Documentation backticks are sometimes unnecessary
#![allow(clippy::redundant_closure, clippy::redundant_closure_for_method_calls)] // Closures are sometimes clearer
#![allow(
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation
)] // Counters and resource amounts are converted on purpose
#![allow(clippy::uninlined_format_args)] // Format args are sometimes clearer inline
#![allow(clippy::significant_drop_in_scrutinee)] // Some temporaries are needed
#![allow(clippy::struct_field_names, clippy::struct_excessive_bools)] // Operator state carries several flags
#![allow(clippy::option_if_let_else)] // if let/else is sometimes clearer than map_or
#![allow(clippy::map_unwrap_or)] // map_or is sometimes clearer
#![allow(clippy::float_cmp)] // Resource components are compared against exact sentinels
#![allow(clippy::significant_drop_tightening)] // Some temporaries with Drop must stay alive
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  add_input / get_next  ┌──────────────────┐
//! │ StreamingExecutor│ ─────────────────────▶ │ PhysicalOperator │
//! └──────────────────┘                        └──────────────────┘
//!          │ wait / dispatch                          │ submit / cancel
//!          ▼                                          ▼
//!     OpTask handles ◀──────────────────────  ExecutionSubstrate
//! ```
//!
//! # Key Components
//!
//! - [`ExecutionResources`]: `(cpu, gpu, object_store_memory)` quantities
//! - [`RefBundle`]: block refs exchanged between operators
//! - [`OpRuntimeMetrics`]: per-operator counters
//! - [`OpTask`]: handles over single-result and streaming work
//! - [`PhysicalOperator`]: the operator contract and concrete operators
//! - [`estimate_total_num_of_blocks`]: output projection from partial progress
//! - [`ExecutionSubstrate`]: boundary to the system running the work
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice_execution::{
//!     ExecutionContext, FnTransform, InputDataBuffer, StreamingExecutor, TaskPoolMapOperator,
//! };
//!
//! let ctx = ExecutionContext::local();
//! let source = InputDataBuffer::new(ctx.clone(), bundles);
//! let map = TaskPoolMapOperator::new(ctx.clone(), source, Arc::new(FnTransform::identity()), None);
//! let result = StreamingExecutor::new(ctx, Default::default()).execute(map)?;
//! ```

pub mod bundle;
pub mod estimation;
pub mod executor;
pub mod metrics;
pub mod operators;
pub mod resources;
pub mod substrate;
pub mod task;

pub use bundle::{BlockExecStats, BlockMetadata, BlockReleaser, RefBundle};
pub use estimation::{estimate_total_num_of_blocks, OutputEstimate};
pub use executor::{ExecutionContext, ExecutionResult, StreamingExecutor};
pub use metrics::{ExecutionTimer, MetricsSink, OpRuntimeMetrics};
pub use operators::{
    explain, post_order, ActorPoolInfo, ActorPoolMapOperator, BoxedPhysicalOperator,
    InputDataBuffer, OperatorBase, OperatorState, PhysicalOperator, TaskPoolMapOperator,
    TaskRegistry, UnionOperator,
};
pub use resources::ExecutionResources;
pub use substrate::{
    ActorHandle, ActorId, ActorSpec, ActorState, BlockRef, BlockTransform, ExecutionSubstrate,
    FnTransform, LocalSubstrate, ObjectRef, ReturnKind, StreamPoll, StreamRef, SubmitMode,
    SubstrateStats, TaskId, TaskSpec, Waitable,
};
pub use task::{DataOpTask, MetadataOpTask, OpTask, OutputReadyCallback, TaskDoneCallback};
