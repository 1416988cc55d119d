//! Resource quantities used for accounting and admission decisions.

use std::fmt;

use common_config::ResourceLimits;
use common_display::format_bytes;
use serde::{Deserialize, Serialize};

/// An immutable `(cpu, gpu, object_store_memory)` triple.
///
/// Components are never negative: constructors clamp negative and NaN inputs
/// to zero, and [`subtract`](Self::subtract) clamps its result. Any component
/// may be `+inf`, which reads as "unbounded".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionResources {
    cpu: f64,
    gpu: f64,
    object_store_memory: f64,
}

fn sanitize(value: f64) -> f64 {
    if value.is_nan() || value < 0.0 {
        0.0
    } else {
        value
    }
}

fn clamped_sub(a: f64, b: f64) -> f64 {
    // inf - inf has no meaningful value; treat it as fully consumed.
    if a.is_infinite() && b.is_infinite() {
        return 0.0;
    }
    (a - b).max(0.0)
}

impl ExecutionResources {
    /// Create a new resource quantity.
    pub fn new(cpu: f64, gpu: f64, object_store_memory: f64) -> Self {
        Self {
            cpu: sanitize(cpu),
            gpu: sanitize(gpu),
            object_store_memory: sanitize(object_store_memory),
        }
    }

    /// All components zero.
    pub const fn zero() -> Self {
        Self {
            cpu: 0.0,
            gpu: 0.0,
            object_store_memory: 0.0,
        }
    }

    /// All components infinite.
    pub const fn inf() -> Self {
        Self {
            cpu: f64::INFINITY,
            gpu: f64::INFINITY,
            object_store_memory: f64::INFINITY,
        }
    }

    /// Build from configured limits; unset limits become infinite.
    pub fn for_limits(limits: &ResourceLimits) -> Self {
        Self::new(
            limits.cpu.unwrap_or(f64::INFINITY),
            limits.gpu.unwrap_or(f64::INFINITY),
            limits.object_store_memory.unwrap_or(f64::INFINITY),
        )
    }

    /// CPU component.
    pub const fn cpu(&self) -> f64 {
        self.cpu
    }

    /// GPU component.
    pub const fn gpu(&self) -> f64 {
        self.gpu
    }

    /// Object store memory component, in bytes.
    pub const fn object_store_memory(&self) -> f64 {
        self.object_store_memory
    }

    /// Copy with a different CPU component.
    pub fn with_cpu(self, cpu: f64) -> Self {
        Self::new(cpu, self.gpu, self.object_store_memory)
    }

    /// Copy with a different GPU component.
    pub fn with_gpu(self, gpu: f64) -> Self {
        Self::new(self.cpu, gpu, self.object_store_memory)
    }

    /// Copy with a different object store memory component.
    pub fn with_object_store_memory(self, bytes: f64) -> Self {
        Self::new(self.cpu, self.gpu, bytes)
    }

    /// Component-wise sum.
    pub fn add(&self, other: &Self) -> Self {
        Self::new(
            self.cpu + other.cpu,
            self.gpu + other.gpu,
            self.object_store_memory + other.object_store_memory,
        )
    }

    /// Component-wise difference, clamped at zero.
    pub fn subtract(&self, other: &Self) -> Self {
        Self::new(
            clamped_sub(self.cpu, other.cpu),
            clamped_sub(self.gpu, other.gpu),
            clamped_sub(self.object_store_memory, other.object_store_memory),
        )
    }

    /// Component-wise maximum.
    pub fn max(&self, other: &Self) -> Self {
        Self::new(
            self.cpu.max(other.cpu),
            self.gpu.max(other.gpu),
            self.object_store_memory.max(other.object_store_memory),
        )
    }

    /// Component-wise minimum.
    pub fn min(&self, other: &Self) -> Self {
        Self::new(
            self.cpu.min(other.cpu),
            self.gpu.min(other.gpu),
            self.object_store_memory.min(other.object_store_memory),
        )
    }

    /// Multiply every component by `factor`. Scaling by zero always yields zero.
    pub fn scale(&self, factor: f64) -> Self {
        if factor <= 0.0 || factor.is_nan() {
            return Self::zero();
        }
        Self::new(
            self.cpu * factor,
            self.gpu * factor,
            self.object_store_memory * factor,
        )
    }

    /// Whether every component is within `limit`.
    pub fn satisfies_limit(&self, limit: &Self) -> bool {
        self.cpu <= limit.cpu
            && self.gpu <= limit.gpu
            && self.object_store_memory <= limit.object_store_memory
    }

    /// Whether every component is zero.
    pub fn is_zero(&self) -> bool {
        self.cpu == 0.0 && self.gpu == 0.0 && self.object_store_memory == 0.0
    }

    /// Whether no component is negative. Holds for every constructed value.
    pub fn is_non_negative(&self) -> bool {
        self.cpu >= 0.0 && self.gpu >= 0.0 && self.object_store_memory >= 0.0
    }

    /// Whether any component is infinite.
    pub fn is_unbounded(&self) -> bool {
        self.cpu.is_infinite() || self.gpu.is_infinite() || self.object_store_memory.is_infinite()
    }
}

impl fmt::Display for ExecutionResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu={}, gpu={}, object_store_memory={}",
            self.cpu,
            self.gpu,
            format_bytes(self.object_store_memory)
        )
    }
}
