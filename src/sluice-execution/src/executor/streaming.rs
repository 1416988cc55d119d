//! Single-threaded streaming driver.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use common_config::{ExecutionOptions, ResourceLimits};
use common_error::{SluiceError, SluiceResult};

use crate::bundle::RefBundle;
use crate::executor::{ExecutionContext, ExecutionResult};
use crate::metrics::{ExecutionTimer, MetricsSink};
use crate::operators::{post_order, PhysicalOperator};
use crate::resources::ExecutionResources;
use crate::substrate::Waitable;
use crate::task::OpTask;

/// Drives a dataflow of physical operators to completion.
///
/// Each tick refreshes resource usage, polls the waitables of every active
/// task and dispatches the ready ones, moves outputs downstream while the
/// consumer accepts them and the resource limits allow, and signals
/// `input_done` once an upstream operator completed. All operators are shut
/// down before returning, forcefully if execution failed.
#[derive(Debug)]
pub struct StreamingExecutor {
    ctx: ExecutionContext,
    options: ExecutionOptions,
}

fn excluded(limits: &ResourceLimits) -> ExecutionResources {
    ExecutionResources::new(
        limits.cpu.unwrap_or(0.0),
        limits.gpu.unwrap_or(0.0),
        limits.object_store_memory.unwrap_or(0.0),
    )
}

impl StreamingExecutor {
    /// Create an executor polling through the context's substrate.
    pub fn new(ctx: ExecutionContext, options: ExecutionOptions) -> Self {
        Self { ctx, options }
    }

    /// The execution options.
    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Resources operators may use together.
    pub fn resource_limits(&self) -> ExecutionResources {
        ExecutionResources::for_limits(&self.options.resource_limits)
            .subtract(&excluded(&self.options.exclude_resources))
    }

    /// Run the dataflow ending at `root` and collect its output.
    pub fn execute(&self, root: Arc<dyn PhysicalOperator>) -> SluiceResult<ExecutionResult> {
        let timer = ExecutionTimer::start();
        let ops = post_order(&root);
        info!("Executing dataflow of {} operators", ops.len());

        let outcome = self.start_all(&ops).and_then(|()| self.run(&ops, &root));
        let force = outcome.is_err();
        for op in &ops {
            if !op.base().is_started() {
                continue;
            }
            if let Err(err) = op.shutdown(force) {
                warn!("Failed to shut down {}: {}", op.name(), err);
            }
        }
        let bundles = outcome?;

        let metrics = MetricsSink::new();
        for (i, op) in ops.iter().enumerate() {
            metrics.record(&format!("{}[{}]", op.name(), i), op.metrics());
        }
        Ok(ExecutionResult::new(bundles, metrics, timer.stop()))
    }

    fn start_all(&self, ops: &[Arc<dyn PhysicalOperator>]) -> SluiceResult<()> {
        for op in ops {
            op.start(&self.options)?;
        }
        Ok(())
    }

    fn run(
        &self,
        ops: &[Arc<dyn PhysicalOperator>],
        root: &Arc<dyn PhysicalOperator>,
    ) -> SluiceResult<Vec<RefBundle>> {
        let mut outputs = Vec::new();
        let mut ticks = 0u64;
        loop {
            ticks += 1;
            for op in ops {
                op.update_resource_usage();
            }

            let mut progressed = self.poll_tasks(ops)?;
            progressed |= self.move_outputs(ops)?;
            while root.has_next() {
                outputs.push(root.get_next()?);
                progressed = true;
            }
            progressed |= Self::propagate_completion(ops)?;

            if root.completed() {
                debug!("Dataflow completed after {} ticks", ticks);
                return Ok(outputs);
            }
            let active: usize = ops.iter().map(|op| op.get_active_tasks().len()).sum();
            if !progressed && active == 0 {
                return Err(SluiceError::execution(format!(
                    "dataflow stalled after {ticks} ticks: no active tasks and no operator made progress"
                )));
            }
        }
    }

    /// Wait on every active task and dispatch the ready ones.
    fn poll_tasks(&self, ops: &[Arc<dyn PhysicalOperator>]) -> SluiceResult<bool> {
        let tasks: HashMap<Waitable, Arc<OpTask>> = ops
            .iter()
            .flat_map(|op| op.get_active_tasks())
            .map(|task| (task.waitable(), task))
            .collect();
        if tasks.is_empty() {
            return Ok(false);
        }

        let waitables: Vec<Waitable> = tasks.keys().copied().collect();
        let timeout = Duration::from_millis(self.options.poll_timeout_ms);
        let (ready, _) = self
            .ctx
            .substrate
            .wait(&waitables, waitables.len(), Some(timeout))?;

        let max_bytes = self.ctx.data.max_bytes_to_read_per_poll;
        let mut progressed = false;
        for waitable in ready {
            let Some(task) = tasks.get(&waitable) else {
                continue;
            };
            match task.as_ref() {
                OpTask::Data(task) => {
                    let bytes = task.on_data_ready(max_bytes)?;
                    progressed |= bytes > 0 || task.is_done();
                }
                OpTask::Metadata(task) => {
                    task.on_task_finished()?;
                    progressed = true;
                }
            }
        }
        Ok(progressed)
    }

    /// Move ready outputs from each input into its consumer.
    fn move_outputs(&self, ops: &[Arc<dyn PhysicalOperator>]) -> SluiceResult<bool> {
        let limits = self.resource_limits();
        let mut progressed = false;
        for op in ops {
            for (index, input) in op.input_dependencies().iter().enumerate() {
                while input.has_next() {
                    if !Self::admits(op.as_ref(), ops, &limits) {
                        op.notify_in_task_submission_backpressure(true);
                        break;
                    }
                    op.notify_in_task_submission_backpressure(false);
                    let bundle = input.get_next()?;
                    op.add_input(bundle, index)?;
                    progressed = true;
                }
            }
        }
        Ok(progressed)
    }

    /// Whether `op` may take one more input under the global limits.
    ///
    /// The check is flat: total usage plus the operator's incremental cost
    /// must fit. When nothing is running, one input is always admitted so the
    /// dataflow cannot deadlock on limits smaller than a single task.
    fn admits(
        op: &dyn PhysicalOperator,
        ops: &[Arc<dyn PhysicalOperator>],
        limits: &ExecutionResources,
    ) -> bool {
        if !op.should_add_input() {
            return false;
        }
        if op.throttling_disabled() {
            return true;
        }
        let usage = ops
            .iter()
            .fold(ExecutionResources::zero(), |acc, op| acc.add(&op.current_usage()));
        usage.is_zero() || usage.add(&op.incremental_usage()).satisfies_limit(limits)
    }

    fn propagate_completion(ops: &[Arc<dyn PhysicalOperator>]) -> SluiceResult<bool> {
        let mut progressed = false;
        for op in ops {
            for (index, input) in op.input_dependencies().iter().enumerate() {
                if !op.base().is_input_done(index) && input.completed() {
                    op.input_done(index)?;
                    progressed = true;
                }
            }
        }
        Ok(progressed)
    }
}
