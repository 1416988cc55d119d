//! Configuration management for sluice.
//!
//! Provides the shared, immutable [`DataContext`] handed to every operator at
//! construction and the [`ExecutionOptions`] handed to operators when the
//! driver starts them.

use serde::{Deserialize, Serialize};

/// Default upper bound on the size of blocks produced by operators (128 MiB).
pub const DEFAULT_TARGET_MAX_BLOCK_SIZE: u64 = 128 * 1024 * 1024;

/// Default lower bound on the size of blocks produced by operators (1 MiB).
pub const DEFAULT_TARGET_MIN_BLOCK_SIZE: u64 = 1024 * 1024;

/// Default number of tasks that may be queued on a single actor.
pub const DEFAULT_MAX_TASKS_IN_FLIGHT_PER_ACTOR: usize = 4;

/// Global sluice configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SluiceConfig {
    /// Per-dataflow data context.
    pub data: DataContext,
    /// Driver-level execution options.
    pub execution: ExecutionOptions,
}

/// Shared configuration visible to every operator of a dataflow.
///
/// Operators receive it behind an `Arc` and never mutate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataContext {
    /// Target maximum block size in bytes. `None` means unbounded.
    pub target_max_block_size: Option<u64>,
    /// Target minimum block size in bytes.
    pub target_min_block_size: u64,
    /// Maximum number of tasks queued on one actor at a time.
    pub max_tasks_in_flight_per_actor: usize,
    /// Whether actor pools gate task dispatch on a readiness probe.
    pub actor_readiness_probe: bool,
    /// CPUs reserved per task when an operator does not say otherwise.
    pub op_default_num_cpus: f64,
    /// Upper bound on bytes drained from one streaming task per poll.
    /// `None` drains everything that is ready.
    pub max_bytes_to_read_per_poll: Option<u64>,
}

impl Default for DataContext {
    fn default() -> Self {
        Self {
            target_max_block_size: Some(DEFAULT_TARGET_MAX_BLOCK_SIZE),
            target_min_block_size: DEFAULT_TARGET_MIN_BLOCK_SIZE,
            max_tasks_in_flight_per_actor: DEFAULT_MAX_TASKS_IN_FLIGHT_PER_ACTOR,
            actor_readiness_probe: true,
            op_default_num_cpus: 1.0,
            max_bytes_to_read_per_poll: None,
        }
    }
}

impl DataContext {
    /// Set the target maximum block size.
    pub fn with_target_max_block_size(mut self, size: Option<u64>) -> Self {
        self.target_max_block_size = size;
        self
    }

    /// Set the maximum number of in-flight tasks per actor.
    pub fn with_max_tasks_in_flight_per_actor(mut self, max_tasks: usize) -> Self {
        self.max_tasks_in_flight_per_actor = max_tasks;
        self
    }

    /// Set the per-poll read budget for streaming tasks.
    pub fn with_max_bytes_to_read_per_poll(mut self, max_bytes: Option<u64>) -> Self {
        self.max_bytes_to_read_per_poll = max_bytes;
        self
    }
}

/// Resource caps applied by the driver. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// CPU cap.
    pub cpu: Option<f64>,
    /// GPU cap.
    pub gpu: Option<f64>,
    /// Object store memory cap in bytes.
    pub object_store_memory: Option<f64>,
}

impl ResourceLimits {
    /// No limits at all.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Set the CPU cap.
    pub fn with_cpu(mut self, cpu: f64) -> Self {
        self.cpu = Some(cpu);
        self
    }

    /// Set the GPU cap.
    pub fn with_gpu(mut self, gpu: f64) -> Self {
        self.gpu = Some(gpu);
        self
    }

    /// Set the object store memory cap.
    pub fn with_object_store_memory(mut self, bytes: f64) -> Self {
        self.object_store_memory = Some(bytes);
        self
    }

    /// Whether every component is unlimited.
    pub fn is_unlimited(&self) -> bool {
        self.cpu.is_none() && self.gpu.is_none() && self.object_store_memory.is_none()
    }
}

/// Options for one execution of a dataflow, passed to `start()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    /// Resource caps for the whole dataflow.
    pub resource_limits: ResourceLimits,
    /// Resources reserved for work outside the dataflow.
    pub exclude_resources: ResourceLimits,
    /// Whether operators must emit outputs in input order.
    pub preserve_order: bool,
    /// Whether to log per-operator statistics at the end of execution.
    pub verbose_stats: bool,
    /// Timeout for the driver's wait call, in milliseconds. 0 polls without blocking.
    pub poll_timeout_ms: u64,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            resource_limits: ResourceLimits::unlimited(),
            exclude_resources: ResourceLimits::unlimited(),
            preserve_order: false,
            verbose_stats: false,
            poll_timeout_ms: 0,
        }
    }
}

impl ExecutionOptions {
    /// Set the resource limits.
    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = limits;
        self
    }

    /// Enable or disable order preservation.
    pub fn with_preserve_order(mut self, preserve: bool) -> Self {
        self.preserve_order = preserve;
        self
    }

    /// Set the driver poll timeout.
    pub fn with_poll_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.poll_timeout_ms = timeout_ms;
        self
    }
}
