//! Map operator running one stateless streaming task per input bundle.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::debug;

use common_error::{SluiceError, SluiceResult};

use crate::bundle::RefBundle;
use crate::estimation::estimate_total_num_of_blocks;
use crate::executor::ExecutionContext;
use crate::operators::traits::{discard_buffered, log_task_failure, release_input};
use crate::operators::{OperatorBase, PhysicalOperator};
use crate::resources::ExecutionResources;
use crate::substrate::{BlockTransform, TaskSpec, Waitable};
use crate::task::{DataOpTask, OpTask};

#[derive(Debug, Default)]
struct MapState {
    outputs: VecDeque<RefBundle>,
    task_inputs: HashMap<usize, RefBundle>,
}

/// Applies a [`BlockTransform`] to each input bundle in its own task.
///
/// Outputs are queued in the order tasks produce them. Owned input blocks
/// are freed once the task that read them finishes, or at a forced shutdown.
/// Outputs still buffered at shutdown are freed.
#[derive(Debug)]
pub struct TaskPoolMapOperator {
    base: OperatorBase,
    me: Weak<Self>,
    transform: Arc<dyn BlockTransform>,
    concurrency: Option<usize>,
    task_resources: ExecutionResources,
    state: Mutex<MapState>,
}

impl TaskPoolMapOperator {
    /// Create a map over `input`. `concurrency` caps the number of running
    /// tasks through [`should_add_input`](PhysicalOperator::should_add_input).
    pub fn new(
        ctx: ExecutionContext,
        input: Arc<dyn PhysicalOperator>,
        transform: Arc<dyn BlockTransform>,
        concurrency: Option<usize>,
    ) -> Arc<Self> {
        let inputs = vec![input];
        let task_resources = ExecutionResources::zero().with_cpu(ctx.data.op_default_num_cpus);
        let name = format!("Map({})", transform.name());
        let op = Arc::new_cyclic(|me| Self {
            base: OperatorBase::new(name, inputs.clone(), ctx),
            me: me.clone(),
            transform,
            concurrency,
            task_resources,
            state: Mutex::new(MapState::default()),
        });
        let weak: Weak<dyn PhysicalOperator> = Arc::downgrade(&op) as Weak<dyn PhysicalOperator>;
        OperatorBase::link_to_inputs(weak, &inputs);
        op
    }

    /// Resources reserved by each task.
    pub fn task_resources(&self) -> ExecutionResources {
        self.task_resources
    }

    fn state(&self) -> MutexGuard<'_, MapState> {
        self.state.lock().expect("map state lock poisoned")
    }

    fn on_task_output(&self, task_index: usize, bundle: RefBundle) {
        self.base.record(|m| {
            m.on_task_output_generated(task_index, &bundle);
            m.on_output_queued(&bundle);
        });
        self.state().outputs.push_back(bundle);
    }

    fn on_task_done(&self, task_index: usize, error: Option<&SluiceError>) {
        self.base.record(|m| m.on_task_finished(task_index, error));
        if let Some(error) = error {
            log_task_failure(&self.base, task_index, error);
        }
        let input = self.state().task_inputs.remove(&task_index);
        if let Some(input) = input {
            release_input(&self.base, &input);
        }
        self.base.tasks().remove(task_index);
        debug!("Task {} of {} done", task_index, self.name());

        let metrics = self.base.metrics();
        let estimate = estimate_total_num_of_blocks(
            metrics.num_tasks_submitted as usize,
            self.upstream_op_num_outputs(),
            &metrics,
            None,
        );
        if estimate.is_known() {
            self.base.set_estimates(
                Some(estimate.num_output_bundles),
                Some(estimate.num_output_rows),
            );
        }
    }
}

impl PhysicalOperator for TaskPoolMapOperator {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn add_input_inner(&self, bundle: RefBundle, _input_index: usize) -> SluiceResult<()> {
        let substrate = Arc::clone(self.base.substrate());
        let task_index = self.base.tasks().next_index();
        let spec = TaskSpec::streaming(
            format!("{}-{}", self.name(), task_index),
            bundle.block_refs(),
            Arc::clone(&self.transform),
        )
        .with_resources(self.task_resources);
        let Waitable::Stream(stream) = substrate.submit(spec)? else {
            return Err(SluiceError::internal(
                "streaming submission returned a single-result handle",
            ));
        };

        self.base.record(|m| m.on_task_submitted(task_index, &bundle));
        self.state().task_inputs.insert(task_index, bundle);

        let on_output = self.me.clone();
        let on_done = self.me.clone();
        let task = DataOpTask::new(
            task_index,
            stream,
            substrate,
            Box::new(move |output| {
                if let Some(op) = on_output.upgrade() {
                    op.on_task_output(task_index, output);
                }
            }),
            Box::new(move |error| {
                if let Some(op) = on_done.upgrade() {
                    op.on_task_done(task_index, error);
                }
            }),
        )
        .with_resources(self.task_resources);
        self.base.tasks().insert(OpTask::Data(task), true);
        debug!("Submitted task {} of {}", task_index, self.name());
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

    fn do_shutdown(&self, force: bool) -> SluiceResult<()> {
        self.base.cancel_active_tasks(force);
        let (task_inputs, outputs) = {
            let mut state = self.state();
            // Tasks left after a non-forced cancel may still read their inputs.
            let task_inputs: Vec<RefBundle> = if force {
                state.task_inputs.drain().map(|(_, input)| input).collect()
            } else {
                Vec::new()
            };
            (task_inputs, state.outputs.drain(..).collect::<Vec<_>>())
        };
        for input in &task_inputs {
            release_input(&self.base, input);
        }
        discard_buffered(&self.base, Vec::new(), outputs);
        Ok(())
    }

    fn should_add_input(&self) -> bool {
        self.concurrency
            .map_or(true, |limit| self.num_active_tasks() < limit)
    }

    fn current_usage(&self) -> ExecutionResources {
        let memory = self.base.metrics().obj_store_mem_used() as f64;
        self.task_resources
            .scale(self.num_active_tasks() as f64)
            .add(&ExecutionResources::zero().with_object_store_memory(memory))
    }

    fn min_max_requirements(&self) -> (ExecutionResources, ExecutionResources) {
        let max = self.concurrency.map_or_else(ExecutionResources::inf, |limit| {
            self.task_resources.scale(limit as f64)
        });
        (self.task_resources, max)
    }

    fn incremental_usage(&self) -> ExecutionResources {
        let metrics = self.base.metrics();
        let expected_output_bytes = match (
            metrics.average_num_outputs_per_task(),
            metrics.average_bytes_per_output(),
        ) {
            (Some(outputs), Some(bytes)) => outputs * bytes,
            _ => 0.0,
        };
        self.task_resources
            .with_object_store_memory(expected_output_bytes)
    }

    fn num_outputs_total(&self) -> Option<usize> {
        if self.execution_finished() {
            Some(self.base.metrics().num_task_outputs_generated as usize)
        } else {
            self.base.estimated_num_output_bundles()
        }
    }

    fn num_output_rows_total(&self) -> Option<usize> {
        if self.execution_finished() {
            Some(self.base.metrics().rows_task_outputs_generated as usize)
        } else {
            self.base.estimated_output_num_rows()
        }
    }

    fn implements_accurate_memory_accounting(&self) -> bool {
        true
    }

    fn display(&self) -> String {
        match self.concurrency {
            Some(limit) => format!("TaskPoolMap[{}, concurrency={}]", self.transform.name(), limit),
            None => format!("TaskPoolMap[{}]", self.transform.name()),
        }
    }
}
