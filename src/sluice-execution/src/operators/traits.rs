//! Physical operator trait and the state every operator shares.

#![allow(clippy::significant_drop_tightening)] // Guards must stay alive for their scope

use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use log::{debug, info, warn};
use uuid::Uuid;

use common_config::{DataContext, ExecutionOptions};
use common_error::{ensure, SluiceError, SluiceResult};

use crate::bundle::RefBundle;
use crate::executor::ExecutionContext;
use crate::metrics::{ExecutionTimer, OpRuntimeMetrics};
use crate::resources::ExecutionResources;
use crate::substrate::ExecutionSubstrate;
use crate::task::OpTask;

/// Counts of actors backing an operator, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActorPoolInfo {
    /// Actors able to run tasks.
    pub running: usize,
    /// Actors still starting.
    pub pending: usize,
    /// Actors being restarted.
    pub restarting: usize,
}

impl fmt::Display for ActorPoolInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "running={}, restarting={}, pending={}",
            self.running, self.restarting, self.pending
        )
    }
}

/// Lifecycle state of an operator.
///
/// ```text
/// Created → Started → InputsComplete → ExecutionFinished → ShutDown
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperatorState {
    /// Constructed, not started.
    #[default]
    Created,
    /// Started and accepting input.
    Started,
    /// Every input index has signaled completion.
    InputsComplete,
    /// No more work will be done; outputs may still be buffered.
    ExecutionFinished,
    /// Shut down.
    ShutDown,
}

impl OperatorState {
    /// Whether inputs may still be added.
    pub fn can_accept_input(&self) -> bool {
        *self == Self::Started
    }

    /// Whether the operator was started and not yet shut down.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            Self::Started | Self::InputsComplete | Self::ExecutionFinished
        )
    }
}

#[derive(Debug)]
struct TaskEntry {
    task: Arc<OpTask>,
    counts_toward_progress: bool,
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_index: usize,
    tasks: BTreeMap<usize, TaskEntry>,
}

/// The set of tasks an operator currently owns, keyed by task index.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    inner: Mutex<RegistryInner>,
}

impl TaskRegistry {
    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().expect("task registry lock poisoned")
    }

    /// Reserve the next dense task index.
    pub fn next_index(&self) -> usize {
        let mut inner = self.lock();
        let index = inner.next_index;
        inner.next_index += 1;
        index
    }

    /// Register a task. Tasks that do not count toward progress (e.g.
    /// readiness probes) are polled but excluded from `num_counted`.
    pub fn insert(&self, task: OpTask, counts_toward_progress: bool) -> Arc<OpTask> {
        let task = Arc::new(task);
        self.lock().tasks.insert(
            task.task_index(),
            TaskEntry {
                task: Arc::clone(&task),
                counts_toward_progress,
            },
        );
        task
    }

    /// Remove a task once its completion callback fired.
    pub fn remove(&self, task_index: usize) -> Option<Arc<OpTask>> {
        self.lock().tasks.remove(&task_index).map(|entry| entry.task)
    }

    /// All registered tasks in index order.
    pub fn snapshot(&self) -> Vec<Arc<OpTask>> {
        self.lock()
            .tasks
            .values()
            .map(|entry| Arc::clone(&entry.task))
            .collect()
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    /// Whether no task is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().tasks.is_empty()
    }

    /// Number of registered tasks that count toward progress.
    pub fn num_counted(&self) -> usize {
        self.lock()
            .tasks
            .values()
            .filter(|entry| entry.counts_toward_progress)
            .count()
    }

    /// Drop every registered task.
    pub fn clear(&self) {
        self.lock().tasks.clear();
    }
}

/// State shared by every physical operator.
///
/// Concrete operators embed one and expose it through
/// [`PhysicalOperator::base`]; the trait's provided methods implement the
/// common lifecycle, I/O protocol and accounting on top of it.
pub struct OperatorBase {
    id: String,
    name: String,
    inputs: Vec<Arc<dyn PhysicalOperator>>,
    outputs: RwLock<Vec<Weak<dyn PhysicalOperator>>>,
    ctx: ExecutionContext,
    target_max_block_size: RwLock<Option<u64>>,
    logical_operators: RwLock<Vec<String>>,
    options: RwLock<ExecutionOptions>,
    metrics: Mutex<OpRuntimeMetrics>,
    tasks: TaskRegistry,
    input_done: Mutex<Vec<bool>>,
    estimated_num_output_bundles: Mutex<Option<usize>>,
    estimated_output_num_rows: Mutex<Option<usize>>,
    started: AtomicBool,
    shutdown: AtomicBool,
    inputs_complete: AtomicBool,
    all_inputs_done_fired: AtomicBool,
    execution_finished: AtomicBool,
    in_task_submission_backpressure: AtomicBool,
    in_task_output_backpressure: AtomicBool,
}

impl OperatorBase {
    /// Create the shared state of an operator reading from `inputs`.
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<Arc<dyn PhysicalOperator>>,
        ctx: ExecutionContext,
    ) -> Self {
        let num_inputs = inputs.len();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            outputs: RwLock::new(Vec::new()),
            ctx,
            target_max_block_size: RwLock::new(None),
            logical_operators: RwLock::new(Vec::new()),
            options: RwLock::new(ExecutionOptions::default()),
            metrics: Mutex::new(OpRuntimeMetrics::new()),
            tasks: TaskRegistry::default(),
            input_done: Mutex::new(vec![false; num_inputs]),
            estimated_num_output_bundles: Mutex::new(None),
            estimated_output_num_rows: Mutex::new(None),
            started: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            inputs_complete: AtomicBool::new(inputs.is_empty()),
            all_inputs_done_fired: AtomicBool::new(false),
            execution_finished: AtomicBool::new(false),
            in_task_submission_backpressure: AtomicBool::new(false),
            in_task_output_backpressure: AtomicBool::new(false),
            inputs,
        }
    }

    /// Register `op` as a downstream consumer of each of its inputs.
    ///
    /// Called by operator constructors once the operator is behind an `Arc`.
    pub fn link_to_inputs(op: Weak<dyn PhysicalOperator>, inputs: &[Arc<dyn PhysicalOperator>]) {
        for input in inputs {
            input
                .base()
                .outputs
                .write()
                .expect("operator outputs lock poisoned")
                .push(op.clone());
        }
    }

    /// Unique operator id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Operator name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upstream operators, fixed at construction.
    pub fn inputs(&self) -> &[Arc<dyn PhysicalOperator>] {
        &self.inputs
    }

    /// Number of input indices.
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// The execution context.
    pub fn ctx(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// The substrate running this operator's tasks.
    pub fn substrate(&self) -> &Arc<dyn ExecutionSubstrate> {
        &self.ctx.substrate
    }

    /// Options passed to `start`.
    pub fn options(&self) -> ExecutionOptions {
        self.options
            .read()
            .expect("operator options lock poisoned")
            .clone()
    }

    /// Active tasks.
    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Mutate the runtime metrics.
    pub fn record<R>(&self, f: impl FnOnce(&mut OpRuntimeMetrics) -> R) -> R {
        let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
        f(&mut metrics)
    }

    /// Copy of the runtime metrics.
    pub fn metrics(&self) -> OpRuntimeMetrics {
        self.metrics.lock().expect("metrics lock poisoned").clone()
    }

    /// Store the projected totals reported by `num_outputs_total` and
    /// `num_output_rows_total`.
    pub fn set_estimates(&self, num_output_bundles: Option<usize>, num_output_rows: Option<usize>) {
        *self
            .estimated_num_output_bundles
            .lock()
            .expect("estimate lock poisoned") = num_output_bundles;
        *self
            .estimated_output_num_rows
            .lock()
            .expect("estimate lock poisoned") = num_output_rows;
    }

    /// Projected total output bundles.
    pub fn estimated_num_output_bundles(&self) -> Option<usize> {
        *self
            .estimated_num_output_bundles
            .lock()
            .expect("estimate lock poisoned")
    }

    /// Projected total output rows.
    pub fn estimated_output_num_rows(&self) -> Option<usize> {
        *self
            .estimated_output_num_rows
            .lock()
            .expect("estimate lock poisoned")
    }

    /// Whether `start` was called.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Whether `shutdown` was called on a started operator.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Whether every input index signaled completion.
    pub fn inputs_complete(&self) -> bool {
        self.inputs_complete.load(Ordering::SeqCst)
    }

    /// Whether `input_index` signaled completion.
    pub fn is_input_done(&self, input_index: usize) -> bool {
        self.input_done
            .lock()
            .expect("input state lock poisoned")
            .get(input_index)
            .copied()
            .unwrap_or(false)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OperatorState {
        if self.is_shut_down() {
            OperatorState::ShutDown
        } else if !self.is_started() {
            OperatorState::Created
        } else if self.execution_finished.load(Ordering::SeqCst) {
            OperatorState::ExecutionFinished
        } else if self.inputs_complete() {
            OperatorState::InputsComplete
        } else {
            OperatorState::Started
        }
    }

    /// Cancel every active task.
    ///
    /// With `force`, also block until each cancelled task resolves. Whatever
    /// the tasks end with is discarded, and the registry is emptied.
    pub fn cancel_active_tasks(&self, force: bool) {
        let tasks = self.tasks.snapshot();
        for task in &tasks {
            if let Err(err) = task.cancel(force) {
                warn!(
                    "Failed to cancel task {} of {}: {}",
                    task.task_index(),
                    self.name,
                    err
                );
            }
        }
        if force {
            for task in &tasks {
                if let Err(err) = task.substrate().get(&task.waitable()) {
                    debug!(
                        "Ignoring outcome of cancelled task {} of {}: {}",
                        task.task_index(),
                        self.name,
                        err
                    );
                }
            }
            self.tasks.clear();
        }
    }
}

impl Debug for OperatorBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorBase")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("num_inputs", &self.inputs.len())
            .field("state", &self.state())
            .field("active_tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

/// A stage of the dataflow graph.
///
/// Operators are driven by a single external driver: it feeds inputs,
/// takes outputs, polls the waitables of active tasks and consults the
/// resource queries before admitting more input. No method blocks except
/// `shutdown(true)`.
///
/// # Lifecycle
///
/// ```text
/// Created → start → (add_input | input_done | get_next)* → shutdown
/// ```
///
/// Implementations provide [`base`](Self::base), the ingestion and
/// extraction logic, and override hooks and resource queries as needed.
pub trait PhysicalOperator: Send + Sync + Debug {
    /// Shared operator state.
    fn base(&self) -> &OperatorBase;

    /// Operator-specific ingestion of one input bundle.
    fn add_input_inner(&self, bundle: RefBundle, input_index: usize) -> SluiceResult<()>;

    /// Whether an output bundle is ready to be taken.
    fn has_next(&self) -> bool;

    /// Operator-specific extraction of the next output bundle.
    fn get_next_inner(&self) -> SluiceResult<RefBundle>;

    /// Hook run by `start` after the operator is marked started.
    fn on_start(&self, _options: &ExecutionOptions) -> SluiceResult<()> {
        Ok(())
    }

    /// Hook run when an input index signals completion.
    fn on_input_done(&self, _input_index: usize) -> SluiceResult<()> {
        Ok(())
    }

    /// Hook run once when every input index has signaled completion.
    fn on_all_inputs_done(&self) -> SluiceResult<()> {
        Ok(())
    }

    /// Operator-specific teardown. Cancels active tasks by default.
    fn do_shutdown(&self, force: bool) -> SluiceResult<()> {
        self.base().cancel_active_tasks(force);
        Ok(())
    }

    /// Bundles buffered internally that still need processing.
    fn internal_queue_size(&self) -> usize {
        0
    }

    /// Unique operator id.
    fn id(&self) -> &str {
        self.base().id()
    }

    /// Operator name.
    fn name(&self) -> &str {
        self.base().name()
    }

    /// Upstream operators in input-index order.
    fn input_dependencies(&self) -> &[Arc<dyn PhysicalOperator>] {
        self.base().inputs()
    }

    /// Downstream operators still alive. Topology only; carries no ownership.
    fn output_dependencies(&self) -> Vec<Arc<dyn PhysicalOperator>> {
        self.base()
            .outputs
            .read()
            .expect("operator outputs lock poisoned")
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Shared configuration.
    fn data_context(&self) -> &Arc<DataContext> {
        &self.base().ctx().data
    }

    /// Snapshot of the runtime metrics.
    fn metrics(&self) -> OpRuntimeMetrics {
        self.base().metrics()
    }

    /// Record the logical operators this operator was planned from.
    fn set_logical_operators(&self, names: Vec<String>) {
        *self
            .base()
            .logical_operators
            .write()
            .expect("logical operators lock poisoned") = names;
    }

    /// The logical operators this operator was planned from.
    fn logical_operators(&self) -> Vec<String> {
        self.base()
            .logical_operators
            .read()
            .expect("logical operators lock poisoned")
            .clone()
    }

    /// Per-operator override of the output block size.
    fn target_max_block_size(&self) -> Option<u64> {
        *self
            .base()
            .target_max_block_size
            .read()
            .expect("block size lock poisoned")
    }

    /// Override the output block size; `None` falls back to the context.
    fn set_target_max_block_size(&self, size: Option<u64>) {
        *self
            .base()
            .target_max_block_size
            .write()
            .expect("block size lock poisoned") = size;
    }

    /// Effective output block size. `None` means unbounded.
    fn actual_target_max_block_size(&self) -> Option<u64> {
        self.target_max_block_size()
            .or(self.data_context().target_max_block_size)
    }

    /// Start the operator. May be called once.
    fn start(&self, options: &ExecutionOptions) -> SluiceResult<()> {
        let base = self.base();
        ensure!(
            !base.started.swap(true, Ordering::SeqCst),
            format!("Operator {} was already started", self.name())
        );
        *base.options.write().expect("operator options lock poisoned") = options.clone();
        debug!("Starting operator {} ({})", self.name(), self.id());
        self.on_start(options)
    }

    /// Advisory: whether the driver should feed more input right now.
    fn should_add_input(&self) -> bool {
        true
    }

    /// Feed one bundle on `input_index`.
    ///
    /// Bundles on the same index are ingested in arrival order.
    fn add_input(&self, bundle: RefBundle, input_index: usize) -> SluiceResult<()> {
        let base = self.base();
        ensure!(
            base.is_started(),
            format!("add_input called on {} before start", self.name())
        );
        ensure!(
            !base.is_shut_down(),
            format!("add_input called on {} after shutdown", self.name())
        );
        ensure!(
            input_index < base.num_inputs(),
            format!(
                "Input index {} out of bounds for {} ({} inputs)",
                input_index,
                self.name(),
                base.num_inputs()
            )
        );
        ensure!(
            !base.is_input_done(input_index),
            format!(
                "add_input called on {} for input {} after input_done",
                self.name(),
                input_index
            )
        );
        let state = base.state();
        ensure!(
            state.can_accept_input(),
            format!("add_input called on {} while {:?}", self.name(), state)
        );
        base.record(|m| m.on_input_received(&bundle));
        self.add_input_inner(bundle, input_index)
    }

    /// Signal that `input_index` will receive no more input.
    fn input_done(&self, input_index: usize) -> SluiceResult<()> {
        let base = self.base();
        ensure!(
            base.is_started(),
            format!("input_done called on {} before start", self.name())
        );
        ensure!(
            !base.is_shut_down(),
            format!("input_done called on {} after shutdown", self.name())
        );
        ensure!(
            input_index < base.num_inputs(),
            format!(
                "Input index {} out of bounds for {} ({} inputs)",
                input_index,
                self.name(),
                base.num_inputs()
            )
        );
        let (newly_done, all_done) = {
            let mut done = base.input_done.lock().expect("input state lock poisoned");
            let newly_done = !done[input_index];
            done[input_index] = true;
            (newly_done, done.iter().all(|d| *d))
        };
        if newly_done {
            debug!("Input {} of {} done", input_index, self.name());
            self.on_input_done(input_index)?;
        }
        if all_done {
            self.all_inputs_done()?;
        }
        Ok(())
    }

    /// Mark every input complete. Fires `on_all_inputs_done` once.
    fn all_inputs_done(&self) -> SluiceResult<()> {
        let base = self.base();
        base.inputs_complete.store(true, Ordering::SeqCst);
        if base.all_inputs_done_fired.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("All inputs of {} done", self.name());
        self.on_all_inputs_done()
    }

    /// Take the next output bundle. Only valid while the operator runs, right
    /// after `has_next` returned true.
    fn get_next(&self) -> SluiceResult<RefBundle> {
        let state = self.base().state();
        ensure!(
            state.is_running(),
            format!("get_next called on {} while {:?}", self.name(), state)
        );
        ensure!(
            self.has_next(),
            format!("get_next called on {} without a pending output", self.name())
        );
        let bundle = self.get_next_inner()?;
        self.base().record(|m| m.on_output_taken(&bundle));
        Ok(bundle)
    }

    /// Mark execution finished regardless of pending work.
    fn mark_execution_finished(&self) {
        if !self.base().execution_finished.swap(true, Ordering::SeqCst) {
            debug!("Execution of {} finished", self.name());
        }
    }

    /// Whether the operator will do no more work.
    ///
    /// Becomes true on its own once inputs are complete, the internal queue
    /// is empty, and no counted task is active. Outputs may still be buffered.
    fn execution_finished(&self) -> bool {
        let base = self.base();
        if !base.execution_finished.load(Ordering::SeqCst)
            && base.inputs_complete()
            && self.internal_queue_size() == 0
            && self.num_active_tasks() == 0
        {
            self.mark_execution_finished();
        }
        base.execution_finished.load(Ordering::SeqCst)
    }

    /// Whether execution finished and every output was taken.
    fn completed(&self) -> bool {
        self.execution_finished() && !self.has_next()
    }

    /// Every task the driver must poll, including uncounted ones.
    fn get_active_tasks(&self) -> Vec<Arc<OpTask>> {
        self.base().tasks().snapshot()
    }

    /// Tasks counting toward progress. May be fewer than `get_active_tasks`.
    fn num_active_tasks(&self) -> usize {
        self.base().tasks().num_counted()
    }

    /// Whether the resource manager should never throttle this operator.
    fn throttling_disabled(&self) -> bool {
        false
    }

    /// Shut the operator down.
    ///
    /// Fails if the operator was never started; a second call does nothing.
    /// Active tasks are cancelled; with `force`, blocks until they resolve.
    fn shutdown(&self, force: bool) -> SluiceResult<()> {
        let base = self.base();
        ensure!(
            base.is_started(),
            format!("Operator {} shut down before it was started", self.name())
        );
        if base.shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let timer = ExecutionTimer::start();
        let result = self.do_shutdown(force);
        let elapsed = timer.stop();
        base.record(|m| m.on_shutdown(elapsed));
        info!("Operator {} shut down in {:?}", self.name(), elapsed);
        result
    }

    /// Resources presently claimed, running and pending.
    fn current_usage(&self) -> ExecutionResources {
        ExecutionResources::zero()
    }

    /// Resources claimed but not yet running, e.g. starting actors.
    fn pending_usage(&self) -> ExecutionResources {
        ExecutionResources::zero()
    }

    /// Resources actively running: current minus pending.
    fn running_usage(&self) -> ExecutionResources {
        self.current_usage().subtract(&self.pending_usage())
    }

    /// `(min, max)` resources: what the operator needs to make any progress,
    /// and what it could productively use.
    fn min_max_requirements(&self) -> (ExecutionResources, ExecutionResources) {
        (ExecutionResources::zero(), ExecutionResources::inf())
    }

    /// Marginal cost of accepting one more input.
    fn incremental_usage(&self) -> ExecutionResources {
        ExecutionResources::zero()
    }

    /// Refresh derived state once per scheduling tick.
    fn update_resource_usage(&self) {}

    /// Enter or leave task submission backpressure.
    fn notify_in_task_submission_backpressure(&self, in_backpressure: bool) {
        let base = self.base();
        if base
            .in_task_submission_backpressure
            .swap(in_backpressure, Ordering::SeqCst)
            != in_backpressure
        {
            base.record(|m| m.on_toggle_task_submission_backpressure(in_backpressure));
        }
    }

    /// Enter or leave task output backpressure.
    fn notify_in_task_output_backpressure(&self, in_backpressure: bool) {
        let base = self.base();
        if base
            .in_task_output_backpressure
            .swap(in_backpressure, Ordering::SeqCst)
            != in_backpressure
        {
            base.record(|m| m.on_toggle_task_output_backpressure(in_backpressure));
        }
    }

    /// Actor counts for display.
    fn get_actor_info(&self) -> ActorPoolInfo {
        ActorPoolInfo::default()
    }

    /// Total output bundles, exact or projected. `None` if unknown.
    fn num_outputs_total(&self) -> Option<usize> {
        self.base().estimated_num_output_bundles()
    }

    /// Total output rows, exact or projected. `None` if unknown.
    fn num_output_rows_total(&self) -> Option<usize> {
        self.base().estimated_output_num_rows()
    }

    /// Sum of the known output totals of the input operators.
    fn upstream_op_num_outputs(&self) -> usize {
        self.input_dependencies()
            .iter()
            .map(|op| op.num_outputs_total().unwrap_or(0))
            .sum()
    }

    /// Extra progress text, e.g. `"2 actors"`.
    fn progress_str(&self) -> String {
        String::new()
    }

    /// Whether all queued bundles are reported through the queue metrics.
    fn implements_accurate_memory_accounting(&self) -> bool {
        false
    }

    /// One-line label used in EXPLAIN output.
    fn display(&self) -> String {
        self.name().to_string()
    }
}

/// Shared operator handle.
pub type BoxedPhysicalOperator = Arc<dyn PhysicalOperator>;

/// Free the blocks of a finished input if the operator owns them.
pub(crate) fn release_input(base: &OperatorBase, input: &RefBundle) {
    let freed = input.destroy_if_owned(base.substrate().as_ref());
    if freed > 0 {
        base.record(|m| m.on_blocks_freed(freed));
    }
}

/// Drop buffered bundles nobody will consume after shutdown, freeing owned blocks.
pub(crate) fn discard_buffered(
    base: &OperatorBase,
    inputs: impl IntoIterator<Item = RefBundle>,
    outputs: impl IntoIterator<Item = RefBundle>,
) {
    for input in inputs {
        base.record(|m| m.on_input_dequeued(&input));
        release_input(base, &input);
    }
    for output in outputs {
        base.record(|m| m.on_output_dequeued(&output));
        release_input(base, &output);
    }
}

/// Log a failed task the way every operator does.
pub(crate) fn log_task_failure(base: &OperatorBase, task_index: usize, error: &SluiceError) {
    warn!("Task {} of {} failed: {}", task_index, base.name(), error);
}
