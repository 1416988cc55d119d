//! Projection of an operator's total output from partial progress.

use crate::metrics::OpRuntimeMetrics;

/// Projected totals for one operator. All zero means "no estimate yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputEstimate {
    /// Total tasks the operator is expected to run.
    pub num_tasks: usize,
    /// Total output bundles the operator is expected to produce.
    pub num_output_bundles: usize,
    /// Total output rows the operator is expected to produce.
    pub num_output_rows: usize,
}

impl OutputEstimate {
    /// Whether there was enough history to estimate.
    pub fn is_known(&self) -> bool {
        *self != Self::default()
    }
}

/// Estimate the total tasks, output bundles and rows of an operator.
///
/// This is a heuristic: the task count is projected from the ratio of
/// upstream outputs to inputs consumed so far (unless `total_num_tasks` is
/// known), and outputs per task are averaged over finished tasks. Early in
/// execution the numbers are noisy; they converge as more tasks finish.
///
/// Returns all zeros until upstream has produced an output, an input has been
/// received, and a task has finished.
pub fn estimate_total_num_of_blocks(
    num_tasks_submitted: usize,
    upstream_op_num_outputs: usize,
    metrics: &OpRuntimeMetrics,
    total_num_tasks: Option<usize>,
) -> OutputEstimate {
    if upstream_op_num_outputs == 0
        || metrics.num_inputs_received == 0
        || metrics.num_tasks_finished == 0
    {
        return OutputEstimate::default();
    }

    let num_tasks = total_num_tasks.map_or_else(
        || {
            upstream_op_num_outputs as f64 / metrics.num_inputs_received as f64
                * num_tasks_submitted as f64
        },
        |total| total as f64,
    );
    let finished = metrics.num_tasks_finished as f64;

    OutputEstimate {
        num_tasks: num_tasks.round() as usize,
        num_output_bundles: (num_tasks * metrics.num_outputs_of_finished_tasks as f64 / finished)
            .round() as usize,
        num_output_rows: (num_tasks * metrics.rows_task_outputs_generated as f64 / finished)
            .round() as usize,
    }
}
