//! Source operator emitting a fixed list of bundles.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use common_config::ExecutionOptions;
use common_error::{protocol_err, SluiceResult};

use crate::bundle::RefBundle;
use crate::executor::ExecutionContext;
use crate::operators::{OperatorBase, PhysicalOperator};

/// Zero-input operator that hands out pre-materialized bundles in order.
#[derive(Debug)]
pub struct InputDataBuffer {
    base: OperatorBase,
    queue: Mutex<VecDeque<RefBundle>>,
    num_outputs: usize,
    num_rows: Option<usize>,
}

impl InputDataBuffer {
    /// Create a source over `bundles`.
    pub fn new(ctx: ExecutionContext, bundles: Vec<RefBundle>) -> Arc<Self> {
        let num_rows = bundles.iter().map(RefBundle::num_rows).sum();
        Arc::new(Self {
            base: OperatorBase::new("Input", Vec::new(), ctx),
            num_outputs: bundles.len(),
            num_rows,
            queue: Mutex::new(bundles.into()),
        })
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<RefBundle>> {
        self.queue.lock().expect("input queue lock poisoned")
    }
}

impl PhysicalOperator for InputDataBuffer {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn on_start(&self, _options: &ExecutionOptions) -> SluiceResult<()> {
        for bundle in self.queue().iter() {
            self.base.record(|m| m.on_output_queued(bundle));
        }
        Ok(())
    }

    fn add_input_inner(&self, _bundle: RefBundle, _input_index: usize) -> SluiceResult<()> {
        protocol_err!("{} has no inputs", self.name())
    }

    fn has_next(&self) -> bool {
        !self.queue().is_empty()
    }

    fn get_next_inner(&self) -> SluiceResult<RefBundle> {
        let Some(bundle) = self.queue().pop_front() else {
            protocol_err!("{} has no buffered output", self.name())
        };
        self.base.record(|m| m.on_output_dequeued(&bundle));
        Ok(bundle)
    }

    fn num_outputs_total(&self) -> Option<usize> {
        Some(self.num_outputs)
    }

    fn num_output_rows_total(&self) -> Option<usize> {
        self.num_rows
    }

    fn implements_accurate_memory_accounting(&self) -> bool {
        true
    }

    fn display(&self) -> String {
        format!("Input[{} bundles]", self.num_outputs)
    }
}
