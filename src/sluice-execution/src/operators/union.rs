//! Union operator.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use common_config::ExecutionOptions;
use common_error::{ensure, SluiceError, SluiceResult};

use crate::bundle::RefBundle;
use crate::executor::ExecutionContext;
use crate::operators::{OperatorBase, PhysicalOperator};

#[derive(Debug, Default)]
struct UnionState {
    preserve_order: bool,
    /// Per-input buffers, only used when preserving order.
    buffers: Vec<VecDeque<RefBundle>>,
    /// First input whose bundles have not all been released.
    cursor: usize,
    outputs: VecDeque<RefBundle>,
}

/// Concatenates the outputs of N inputs without launching tasks.
///
/// By default bundles are forwarded as they arrive. With `preserve_order`,
/// all bundles of input `i` are emitted before any bundle of input `i + 1`.
#[derive(Debug)]
pub struct UnionOperator {
    base: OperatorBase,
    state: Mutex<UnionState>,
}

impl UnionOperator {
    /// Create a union over `inputs`.
    pub fn new(
        ctx: ExecutionContext,
        inputs: Vec<Arc<dyn PhysicalOperator>>,
    ) -> SluiceResult<Arc<Self>> {
        ensure!(
            inputs.len() >= 2,
            InvalidParameter: "union needs at least two inputs, got {}", inputs.len()
        );
        let num_inputs = inputs.len();
        let op = Arc::new(Self {
            base: OperatorBase::new("Union", inputs.clone(), ctx),
            state: Mutex::new(UnionState {
                buffers: vec![VecDeque::new(); num_inputs],
                ..UnionState::default()
            }),
        });
        let weak: Weak<dyn PhysicalOperator> = Arc::downgrade(&op) as Weak<dyn PhysicalOperator>;
        OperatorBase::link_to_inputs(weak, &inputs);
        Ok(op)
    }

    fn state(&self) -> MutexGuard<'_, UnionState> {
        self.state.lock().expect("union state lock poisoned")
    }

    fn push_output(&self, state: &mut UnionState, bundle: RefBundle) {
        self.base.record(|m| m.on_output_queued(&bundle));
        state.outputs.push_back(bundle);
    }

    /// Release buffered bundles of the inputs that are next in order.
    fn flush_in_order(&self, state: &mut UnionState) {
        while state.cursor < state.buffers.len() {
            let cursor = state.cursor;
            while let Some(bundle) = state.buffers[cursor].pop_front() {
                self.base.record(|m| m.on_input_dequeued(&bundle));
                self.push_output(state, bundle);
            }
            if !self.base.is_input_done(cursor) {
                break;
            }
            state.cursor += 1;
        }
    }
}

impl PhysicalOperator for UnionOperator {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn on_start(&self, options: &ExecutionOptions) -> SluiceResult<()> {
        self.state().preserve_order = options.preserve_order;
        Ok(())
    }

    fn add_input_inner(&self, bundle: RefBundle, input_index: usize) -> SluiceResult<()> {
        let mut state = self.state();
        if state.preserve_order && input_index != state.cursor {
            self.base.record(|m| m.on_input_queued(&bundle));
            state.buffers[input_index].push_back(bundle);
        } else {
            self.push_output(&mut state, bundle);
        }
        Ok(())
    }

    fn on_input_done(&self, _input_index: usize) -> SluiceResult<()> {
        let mut state = self.state();
        if state.preserve_order {
            self.flush_in_order(&mut state);
        }
        Ok(())
    }

    fn has_next(&self) -> bool {
        !self.state().outputs.is_empty()
    }

    fn get_next_inner(&self) -> SluiceResult<RefBundle> {
        let Some(bundle) = self.state().outputs.pop_front() else {
            return Err(SluiceError::protocol(format!(
                "{} has no buffered output",
                self.name()
            )));
        };
        self.base.record(|m| m.on_output_dequeued(&bundle));
        Ok(bundle)
    }

    fn internal_queue_size(&self) -> usize {
        self.state().buffers.iter().map(VecDeque::len).sum()
    }

    fn throttling_disabled(&self) -> bool {
        true
    }

    fn num_outputs_total(&self) -> Option<usize> {
        self.input_dependencies()
            .iter()
            .map(|op| op.num_outputs_total())
            .sum()
    }

    fn num_output_rows_total(&self) -> Option<usize> {
        self.input_dependencies()
            .iter()
            .map(|op| op.num_output_rows_total())
            .sum()
    }

    fn implements_accurate_memory_accounting(&self) -> bool {
        true
    }

    fn display(&self) -> String {
        format!("Union[{} inputs]", self.input_dependencies().len())
    }
}
