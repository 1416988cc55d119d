//! Core error types for sluice.

use thiserror::Error;

/// Result type alias using `SluiceError`.
pub type SluiceResult<T> = std::result::Result<T, SluiceError>;

/// Generic boxed error for external error sources.
pub type GenericError = Box<dyn std::error::Error + Send + Sync>;

/// Core error type for sluice operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SluiceError {
    /// Remote work raised an error.
    #[error("TaskFailed: {0}")]
    TaskFailed(String),

    /// Remote work was cancelled before it produced a result.
    #[error("TaskCancelled: {0}")]
    TaskCancelled(String),

    /// The actor hosting a task died.
    #[error("ActorDied: {0}")]
    ActorDied(String),

    /// A driver or operator broke the operator contract.
    #[error("ProtocolViolation: {0}")]
    ProtocolViolation(String),

    /// Invalid value provided.
    #[error("ValueError: {0}")]
    ValueError(String),

    /// Invalid parameter provided.
    #[error("InvalidParameter: {0}")]
    InvalidParameter(String),

    /// Execution error not attributable to a single task.
    #[error("ExecutionError: {0}")]
    ExecutionError(String),

    /// Internal error (bug in sluice).
    #[error("InternalError: {0}")]
    InternalError(String),

    /// Arrow error.
    #[error("ArrowError: {0}")]
    ArrowError(#[from] arrow_schema::ArrowError),

    /// JSON serialization error.
    #[error("SerdeJsonError: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// External error from third-party libraries.
    #[error("ExternalError: {0}")]
    ExternalError(GenericError),
}

impl SluiceError {
    /// Create a new `TaskFailed` error.
    pub fn task_failed<S: Into<String>>(msg: S) -> Self {
        Self::TaskFailed(msg.into())
    }

    /// Create a new `TaskCancelled` error.
    pub fn task_cancelled<S: Into<String>>(msg: S) -> Self {
        Self::TaskCancelled(msg.into())
    }

    /// Create a new `ActorDied` error.
    pub fn actor_died<S: Into<String>>(msg: S) -> Self {
        Self::ActorDied(msg.into())
    }

    /// Create a new `ProtocolViolation` error.
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Create a new `ValueError`.
    pub fn value_error<S: Into<String>>(msg: S) -> Self {
        Self::ValueError(msg.into())
    }

    /// Create a new `InvalidParameter` error.
    pub fn invalid_parameter<S: Into<String>>(msg: S) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Create a new `ExecutionError`.
    pub fn execution<S: Into<String>>(msg: S) -> Self {
        Self::ExecutionError(msg.into())
    }

    /// Create a new `InternalError`.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::InternalError(msg.into())
    }

    /// Whether this error was raised by the execution substrate rather than
    /// by local code: a failed, cancelled, or actor-lost task.
    pub fn is_substrate_error(&self) -> bool {
        matches!(
            self,
            Self::TaskFailed(_) | Self::TaskCancelled(_) | Self::ActorDied(_)
        )
    }

    /// Whether this error reports a broken driver/operator contract.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_))
    }
}

/// Ensure a condition holds, returning a `ProtocolViolation` if not.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $variant:ident: $($msg:tt)*) => {
        if !$cond {
            return Err($crate::SluiceError::$variant(format!($($msg)*)));
        }
    };
    ($cond:expr, $msg:expr) => {
        if !$cond {
            return Err($crate::SluiceError::ProtocolViolation($msg.to_string()));
        }
    };
}

/// Return early with a `ProtocolViolation`.
#[macro_export]
macro_rules! protocol_err {
    ($($arg:tt)*) => {
        return Err($crate::SluiceError::ProtocolViolation(format!($($arg)*)))
    };
}
