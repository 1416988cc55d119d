//! Error types and result aliases for sluice.
//!
//! Every fallible operation in the workspace returns [`SluiceResult`].
//! Errors fall into three groups:
//!
//! - substrate failures raised by remote work ([`SluiceError::is_substrate_error`]),
//! - protocol violations by a driver or operator (always fail fast),
//! - everything else (configuration, Arrow, serialization, internal bugs).

mod error;

pub use error::{GenericError, SluiceError, SluiceResult};
