//! Runtime metrics for physical operators.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Write};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use common_display::format_bytes;
use common_error::SluiceError;

use crate::bundle::RefBundle;

#[derive(Debug, Clone, Copy, Default)]
struct RunningTaskInfo {
    input_bytes: u64,
    num_outputs: u64,
    bytes_outputs: u64,
    rows_outputs: u64,
}

/// Counters for a single operator.
///
/// Owned by its operator and only mutated through the `on_*` methods; other
/// components read snapshots.
#[derive(Debug, Clone, Default)]
pub struct OpRuntimeMetrics {
    /// Input bundles received.
    pub num_inputs_received: u64,
    /// Bytes of input bundles received.
    pub bytes_inputs_received: u64,
    /// Input bundles consumed by finished tasks.
    pub num_task_inputs_processed: u64,
    /// Bytes of input bundles consumed by finished tasks.
    pub bytes_task_inputs_processed: u64,

    /// Output bundles generated by tasks.
    pub num_task_outputs_generated: u64,
    /// Bytes of output bundles generated by tasks.
    pub bytes_task_outputs_generated: u64,
    /// Rows of output bundles generated by tasks.
    pub rows_task_outputs_generated: u64,

    /// Output bundles taken by the downstream consumer.
    pub num_outputs_taken: u64,
    /// Bytes of output bundles taken by the downstream consumer.
    pub bytes_outputs_taken: u64,

    /// Output bundles generated by tasks that have finished.
    pub num_outputs_of_finished_tasks: u64,
    /// Bytes generated by tasks that have finished.
    pub bytes_outputs_of_finished_tasks: u64,
    /// Rows generated by tasks that have finished.
    pub rows_outputs_of_finished_tasks: u64,

    /// Tasks submitted.
    pub num_tasks_submitted: u64,
    /// Tasks currently running.
    pub num_tasks_running: u64,
    /// Tasks that produced at least one output.
    pub num_tasks_have_outputs: u64,
    /// Tasks finished, successfully or not.
    pub num_tasks_finished: u64,
    /// Tasks finished with an error.
    pub num_tasks_failed: u64,

    /// Object store bytes held by the internal input queue.
    pub obj_store_mem_internal_inqueue: u64,
    /// Blocks held by the internal input queue.
    pub obj_store_mem_internal_inqueue_blocks: u64,
    /// Object store bytes held by the internal output queue.
    pub obj_store_mem_internal_outqueue: u64,
    /// Blocks held by the internal output queue.
    pub obj_store_mem_internal_outqueue_blocks: u64,
    /// Object store bytes of inputs held by running tasks.
    pub obj_store_mem_pending_task_inputs: u64,
    /// Object store bytes freed by this operator.
    pub obj_store_mem_freed: u64,

    /// Time spent in task submission backpressure.
    pub task_submission_backpressure_time: Duration,
    /// Transitions of the task submission backpressure flag.
    pub num_task_submission_backpressure_toggles: u64,
    /// Time spent in task output backpressure.
    pub task_output_backpressure_time: Duration,
    /// Transitions of the task output backpressure flag.
    pub num_task_output_backpressure_toggles: u64,

    /// Time taken by the operator's shutdown.
    pub shutdown_time: Duration,

    submission_backpressure_start: Option<Instant>,
    output_backpressure_start: Option<Instant>,
    running_tasks: BTreeMap<usize, RunningTaskInfo>,
}

impl OpRuntimeMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// An input bundle arrived through `add_input`.
    pub fn on_input_received(&mut self, input: &RefBundle) {
        self.num_inputs_received += 1;
        self.bytes_inputs_received += input.size_bytes();
    }

    /// An input bundle was buffered in the internal input queue.
    pub fn on_input_queued(&mut self, input: &RefBundle) {
        self.obj_store_mem_internal_inqueue += input.size_bytes();
        self.obj_store_mem_internal_inqueue_blocks += input.num_blocks() as u64;
    }

    /// An input bundle left the internal input queue.
    pub fn on_input_dequeued(&mut self, input: &RefBundle) {
        self.obj_store_mem_internal_inqueue = self
            .obj_store_mem_internal_inqueue
            .saturating_sub(input.size_bytes());
        self.obj_store_mem_internal_inqueue_blocks = self
            .obj_store_mem_internal_inqueue_blocks
            .saturating_sub(input.num_blocks() as u64);
    }

    /// An output bundle was buffered in the internal output queue.
    pub fn on_output_queued(&mut self, output: &RefBundle) {
        self.obj_store_mem_internal_outqueue += output.size_bytes();
        self.obj_store_mem_internal_outqueue_blocks += output.num_blocks() as u64;
    }

    /// An output bundle left the internal output queue.
    pub fn on_output_dequeued(&mut self, output: &RefBundle) {
        self.obj_store_mem_internal_outqueue = self
            .obj_store_mem_internal_outqueue
            .saturating_sub(output.size_bytes());
        self.obj_store_mem_internal_outqueue_blocks = self
            .obj_store_mem_internal_outqueue_blocks
            .saturating_sub(output.num_blocks() as u64);
    }

    /// An output bundle was handed out through `get_next`.
    pub fn on_output_taken(&mut self, output: &RefBundle) {
        self.num_outputs_taken += 1;
        self.bytes_outputs_taken += output.size_bytes();
    }

    /// A task was submitted with the given inputs.
    pub fn on_task_submitted(&mut self, task_index: usize, inputs: &RefBundle) {
        self.num_tasks_submitted += 1;
        self.num_tasks_running += 1;
        self.obj_store_mem_pending_task_inputs += inputs.size_bytes();
        self.running_tasks.insert(
            task_index,
            RunningTaskInfo {
                input_bytes: inputs.size_bytes(),
                ..RunningTaskInfo::default()
            },
        );
    }

    /// A running task produced an output bundle.
    pub fn on_task_output_generated(&mut self, task_index: usize, output: &RefBundle) {
        let bytes = output.size_bytes();
        let rows = output.num_rows().unwrap_or(0) as u64;
        self.num_task_outputs_generated += 1;
        self.bytes_task_outputs_generated += bytes;
        self.rows_task_outputs_generated += rows;

        if let Some(info) = self.running_tasks.get_mut(&task_index) {
            if info.num_outputs == 0 {
                self.num_tasks_have_outputs += 1;
            }
            info.num_outputs += 1;
            info.bytes_outputs += bytes;
            info.rows_outputs += rows;
        }
    }

    /// A task terminated, with `error` set if it failed.
    pub fn on_task_finished(&mut self, task_index: usize, error: Option<&SluiceError>) {
        self.num_tasks_finished += 1;
        self.num_tasks_running = self.num_tasks_running.saturating_sub(1);
        if error.is_some() {
            self.num_tasks_failed += 1;
        }

        let info = self.running_tasks.remove(&task_index).unwrap_or_default();
        self.num_task_inputs_processed += 1;
        self.bytes_task_inputs_processed += info.input_bytes;
        self.obj_store_mem_pending_task_inputs = self
            .obj_store_mem_pending_task_inputs
            .saturating_sub(info.input_bytes);
        self.num_outputs_of_finished_tasks += info.num_outputs;
        self.bytes_outputs_of_finished_tasks += info.bytes_outputs;
        self.rows_outputs_of_finished_tasks += info.rows_outputs;
    }

    /// Blocks owned by the operator were released.
    pub fn on_blocks_freed(&mut self, bytes: u64) {
        self.obj_store_mem_freed += bytes;
    }

    /// The task submission backpressure flag changed.
    pub fn on_toggle_task_submission_backpressure(&mut self, in_backpressure: bool) {
        self.num_task_submission_backpressure_toggles += 1;
        if in_backpressure {
            self.submission_backpressure_start.get_or_insert_with(Instant::now);
        } else if let Some(start) = self.submission_backpressure_start.take() {
            self.task_submission_backpressure_time += start.elapsed();
        }
    }

    /// The task output backpressure flag changed.
    pub fn on_toggle_task_output_backpressure(&mut self, in_backpressure: bool) {
        self.num_task_output_backpressure_toggles += 1;
        if in_backpressure {
            self.output_backpressure_start.get_or_insert_with(Instant::now);
        } else if let Some(start) = self.output_backpressure_start.take() {
            self.task_output_backpressure_time += start.elapsed();
        }
    }

    /// Record how long the operator's shutdown took.
    pub fn on_shutdown(&mut self, elapsed: Duration) {
        self.shutdown_time = elapsed;
    }

    /// Object store bytes currently attributed to the operator.
    pub fn obj_store_mem_used(&self) -> u64 {
        self.obj_store_mem_internal_inqueue
            + self.obj_store_mem_internal_outqueue
            + self.obj_store_mem_pending_task_inputs
    }

    /// Average output bundles per finished task.
    pub fn average_num_outputs_per_task(&self) -> Option<f64> {
        if self.num_tasks_finished == 0 {
            None
        } else {
            Some(self.num_outputs_of_finished_tasks as f64 / self.num_tasks_finished as f64)
        }
    }

    /// Average bytes per output bundle of finished tasks.
    pub fn average_bytes_per_output(&self) -> Option<f64> {
        if self.num_outputs_of_finished_tasks == 0 {
            None
        } else {
            Some(
                self.bytes_outputs_of_finished_tasks as f64
                    / self.num_outputs_of_finished_tasks as f64,
            )
        }
    }

    /// Whether the operator is in task submission backpressure right now.
    pub fn in_task_submission_backpressure(&self) -> bool {
        self.submission_backpressure_start.is_some()
    }
}

impl fmt::Display for OpRuntimeMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inputs={}, tasks={}/{} (failed {}), outputs={}/{}, obj_store_mem={}",
            self.num_inputs_received,
            self.num_tasks_finished,
            self.num_tasks_submitted,
            self.num_tasks_failed,
            self.num_outputs_taken,
            self.num_task_outputs_generated,
            format_bytes(self.obj_store_mem_used() as f64)
        )
    }
}

/// Sink collecting final metrics per operator.
#[derive(Debug, Clone, Default)]
pub struct MetricsSink {
    metrics: Arc<RwLock<HashMap<String, OpRuntimeMetrics>>>,
}

impl MetricsSink {
    /// Create a new metrics sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record metrics for an operator.
    pub fn record(&self, operator: &str, metrics: OpRuntimeMetrics) {
        self.metrics
            .write()
            .expect("metrics lock poisoned")
            .insert(operator.to_string(), metrics);
    }

    /// Get metrics for an operator.
    pub fn get(&self, operator: &str) -> Option<OpRuntimeMetrics> {
        self.metrics
            .read()
            .expect("metrics lock poisoned")
            .get(operator)
            .cloned()
    }

    /// Get all metrics.
    pub fn all(&self) -> HashMap<String, OpRuntimeMetrics> {
        self.metrics.read().expect("metrics lock poisoned").clone()
    }

    /// Total tasks submitted across all operators.
    pub fn total_tasks_submitted(&self) -> u64 {
        self.metrics
            .read()
            .expect("metrics lock poisoned")
            .values()
            .map(|m| m.num_tasks_submitted)
            .sum()
    }

    /// Format one line per operator, sorted by name.
    pub fn format_analyze(&self) -> String {
        let metrics = self.metrics.read().expect("metrics lock poisoned");
        let mut names: Vec<&String> = metrics.keys().collect();
        names.sort();

        let mut output = String::new();
        for name in names {
            let _ = writeln!(output, "{}: {}", name, metrics[name]);
        }
        if output.is_empty() {
            output.push_str("No metrics collected.\n");
        }
        output
    }
}

/// Timer for measuring elapsed wall time.
#[derive(Debug)]
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time without stopping.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop and return elapsed time.
    #[must_use]
    pub fn stop(self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for ExecutionTimer {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::bundle::BlockMetadata;
    use crate::substrate::{ObjectRef, TaskId};

    fn bundle(rows: usize, bytes: u64) -> RefBundle {
        RefBundle::new(
            vec![(ObjectRef::new(1, TaskId(0), None), BlockMetadata::new(rows, bytes))],
            true,
            None,
        )
    }

    #[test]
    fn test_task_lifecycle_counters() {
        let mut m = OpRuntimeMetrics::new();
        m.on_input_received(&bundle(10, 100));
        m.on_task_submitted(0, &bundle(10, 100));
        assert_eq!(m.num_tasks_running, 1);
        assert_eq!(m.obj_store_mem_pending_task_inputs, 100);

        m.on_task_output_generated(0, &bundle(5, 40));
        m.on_task_output_generated(0, &bundle(5, 40));
        assert_eq!(m.num_tasks_have_outputs, 1);
        assert_eq!(m.rows_task_outputs_generated, 10);

        m.on_task_finished(0, None);
        assert_eq!(m.num_tasks_running, 0);
        assert_eq!(m.num_tasks_finished, 1);
        assert_eq!(m.num_outputs_of_finished_tasks, 2);
        assert_eq!(m.bytes_outputs_of_finished_tasks, 80);
        assert_eq!(m.obj_store_mem_pending_task_inputs, 0);
        assert_eq!(m.average_num_outputs_per_task(), Some(2.0));
        assert_eq!(m.average_bytes_per_output(), Some(40.0));
    }

    #[test]
    fn test_failed_task_counted() {
        let mut m = OpRuntimeMetrics::new();
        m.on_task_submitted(3, &bundle(1, 1));
        m.on_task_finished(3, Some(&SluiceError::task_failed("boom")));
        assert_eq!(m.num_tasks_failed, 1);
        assert_eq!(m.num_tasks_finished, 1);
    }

    #[test]
    fn test_queue_accounting_never_underflows() {
        let mut m = OpRuntimeMetrics::new();
        m.on_output_queued(&bundle(1, 64));
        m.on_input_queued(&bundle(1, 32));
        assert_eq!(m.obj_store_mem_used(), 96);

        m.on_output_dequeued(&bundle(1, 64));
        m.on_output_dequeued(&bundle(1, 64));
        m.on_input_dequeued(&bundle(1, 32));
        assert_eq!(m.obj_store_mem_internal_outqueue, 0);
        assert_eq!(m.obj_store_mem_internal_outqueue_blocks, 0);
        assert_eq!(m.obj_store_mem_used(), 0);
    }

    #[test]
    fn test_backpressure_time_accumulates() {
        let mut m = OpRuntimeMetrics::new();
        m.on_toggle_task_submission_backpressure(true);
        assert!(m.in_task_submission_backpressure());
        std::thread::sleep(Duration::from_millis(5));
        m.on_toggle_task_submission_backpressure(false);

        assert_eq!(m.num_task_submission_backpressure_toggles, 2);
        assert!(m.task_submission_backpressure_time >= Duration::from_millis(5));
        assert!(!m.in_task_submission_backpressure());
    }

    #[test]
    fn test_metrics_sink() {
        let sink = MetricsSink::new();
        let mut a = OpRuntimeMetrics::new();
        a.num_tasks_submitted = 3;
        let mut b = OpRuntimeMetrics::new();
        b.num_tasks_submitted = 4;
        sink.record("Map", a);
        sink.record("Input", b);

        assert_eq!(sink.total_tasks_submitted(), 7);
        assert!(sink.get("Map").is_some());
        let text = sink.format_analyze();
        assert!(text.starts_with("Input: "));
        assert!(text.contains("Map: inputs=0, tasks=0/3"));
    }

    #[test]
    fn test_execution_timer() {
        let timer = ExecutionTimer::start();
        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.stop() >= Duration::from_millis(10));
    }
}
