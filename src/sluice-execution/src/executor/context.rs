//! Execution context shared by the operators of one dataflow.

use std::sync::Arc;

use common_config::DataContext;

use crate::substrate::{ExecutionSubstrate, LocalSubstrate};

/// Context handed to every operator at construction.
///
/// The context is read-only to operators and shared across the dataflow:
/// the configuration snapshot and the substrate that runs submitted work.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Shared configuration.
    pub data: Arc<DataContext>,
    /// Substrate running submitted tasks and actors.
    pub substrate: Arc<dyn ExecutionSubstrate>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Create a new execution context.
    pub fn new(data: DataContext, substrate: Arc<dyn ExecutionSubstrate>) -> Self {
        Self {
            data: Arc::new(data),
            substrate,
        }
    }

    /// Context with default configuration over an eager in-process substrate.
    pub fn local() -> Self {
        Self::new(DataContext::default(), Arc::new(LocalSubstrate::eager()))
    }

    /// Replace the configuration.
    pub fn with_data_context(mut self, data: DataContext) -> Self {
        self.data = Arc::new(data);
        self
    }
}
