//! Map operator running tasks on a fixed pool of stateful actors.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Write;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::{debug, warn};

use common_config::ExecutionOptions;
use common_error::{ensure, SluiceError, SluiceResult};

use crate::bundle::RefBundle;
use crate::estimation::estimate_total_num_of_blocks;
use crate::executor::ExecutionContext;
use crate::operators::traits::{discard_buffered, log_task_failure, release_input};
use crate::operators::{ActorPoolInfo, OperatorBase, PhysicalOperator};
use crate::resources::ExecutionResources;
use crate::substrate::{ActorId, ActorSpec, ActorState, BlockTransform, TaskSpec, Waitable};
use crate::task::{DataOpTask, MetadataOpTask, OpTask};

#[derive(Debug)]
struct ActorEntry {
    state: ActorState,
    ready: bool,
    in_flight: usize,
}

impl ActorEntry {
    fn is_running(&self) -> bool {
        self.ready && self.state == ActorState::Alive
    }
}

#[derive(Debug, Default)]
struct PoolState {
    actors: BTreeMap<ActorId, ActorEntry>,
    input_queue: VecDeque<RefBundle>,
    outputs: VecDeque<RefBundle>,
    task_inputs: HashMap<usize, (RefBundle, ActorId)>,
}

impl PoolState {
    fn free_slots(&self, max_in_flight: usize) -> usize {
        self.actors
            .values()
            .filter(|actor| actor.is_running())
            .map(|actor| max_in_flight.saturating_sub(actor.in_flight))
            .sum()
    }

    /// Least loaded running actor with a free slot.
    fn pick_actor(&self, max_in_flight: usize) -> Option<ActorId> {
        self.actors
            .iter()
            .filter(|(_, actor)| actor.is_running() && actor.in_flight < max_in_flight)
            .min_by_key(|(_, actor)| actor.in_flight)
            .map(|(id, _)| *id)
    }

    fn info(&self) -> ActorPoolInfo {
        let mut info = ActorPoolInfo::default();
        for actor in self.actors.values() {
            match actor.state {
                ActorState::Restarting => info.restarting += 1,
                ActorState::Dead => {}
                _ if actor.is_running() => info.running += 1,
                _ => info.pending += 1,
            }
        }
        info
    }
}

/// Applies a [`BlockTransform`] on a fixed-size pool of actors.
///
/// Actors are created in `start`. Until an actor passes its readiness probe
/// it takes no work; inputs wait in an internal queue and are dispatched to
/// the least loaded running actor with a free slot. Each actor runs at most
/// `max_tasks_in_flight_per_actor` tasks at once. Shutdown kills every actor
/// and frees owned bundles still queued or buffered; a forced shutdown also
/// frees the inputs of tasks that never reported back.
#[derive(Debug)]
pub struct ActorPoolMapOperator {
    base: OperatorBase,
    me: Weak<Self>,
    transform: Arc<dyn BlockTransform>,
    pool_size: usize,
    max_tasks_in_flight: usize,
    actor_resources: ExecutionResources,
    state: Mutex<PoolState>,
}

impl ActorPoolMapOperator {
    /// Create a map over `input` running on `pool_size` actors.
    pub fn new(
        ctx: ExecutionContext,
        input: Arc<dyn PhysicalOperator>,
        transform: Arc<dyn BlockTransform>,
        pool_size: usize,
    ) -> SluiceResult<Arc<Self>> {
        ensure!(
            pool_size > 0,
            InvalidParameter: "actor pool size must be positive, got {}", pool_size
        );
        ensure!(
            ctx.data.max_tasks_in_flight_per_actor > 0,
            InvalidParameter: "max_tasks_in_flight_per_actor must be positive"
        );
        let inputs = vec![input];
        let actor_resources = ExecutionResources::zero().with_cpu(ctx.data.op_default_num_cpus);
        let max_tasks_in_flight = ctx.data.max_tasks_in_flight_per_actor;
        let name = format!("ActorPoolMap({})", transform.name());
        let op = Arc::new_cyclic(|me| Self {
            base: OperatorBase::new(name, inputs.clone(), ctx),
            me: me.clone(),
            transform,
            pool_size,
            max_tasks_in_flight,
            actor_resources,
            state: Mutex::new(PoolState::default()),
        });
        let weak: Weak<dyn PhysicalOperator> = Arc::downgrade(&op) as Weak<dyn PhysicalOperator>;
        OperatorBase::link_to_inputs(weak, &inputs);
        Ok(op)
    }

    /// Resources each actor holds.
    pub fn actor_resources(&self) -> ExecutionResources {
        self.actor_resources
    }

    /// Ids of the actors in the pool, empty before `start`.
    pub fn actor_ids(&self) -> Vec<ActorId> {
        self.state().actors.keys().copied().collect()
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().expect("actor pool state lock poisoned")
    }

    fn on_actor_ready(&self, task_index: usize, actor: ActorId, error: Option<&SluiceError>) {
        self.base.tasks().remove(task_index);
        {
            let mut state = self.state();
            if let Some(entry) = state.actors.get_mut(&actor) {
                match error {
                    None => {
                        entry.ready = true;
                        entry.state = ActorState::Alive;
                    }
                    Some(_) => entry.state = ActorState::Dead,
                }
            }
        }
        match error {
            None => debug!("Actor {} of {} is ready", actor.0, self.name()),
            Some(error) => warn!("Actor {} of {} failed to start: {}", actor.0, self.name(), error),
        }
        self.dispatch_logged();
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
        let finished = {
            let mut state = self.state();
            let finished = state.task_inputs.remove(&task_index);
            if let Some((_, actor)) = &finished {
                if let Some(entry) = state.actors.get_mut(actor) {
                    entry.in_flight = entry.in_flight.saturating_sub(1);
                }
            }
            finished
        };
        if let Some((input, _)) = finished {
            release_input(&self.base, &input);
        }
        self.base.tasks().remove(task_index);

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
        self.dispatch_logged();
    }

    /// Submit queued inputs while a running actor has a free slot.
    fn dispatch(&self) -> SluiceResult<()> {
        if self.base.is_shut_down() {
            return Ok(());
        }
        loop {
            let (bundle, actor) = {
                let mut state = self.state();
                if state.input_queue.is_empty() {
                    return Ok(());
                }
                let Some(actor) = state.pick_actor(self.max_tasks_in_flight) else {
                    return Ok(());
                };
                let Some(bundle) = state.input_queue.pop_front() else {
                    return Ok(());
                };
                if let Some(entry) = state.actors.get_mut(&actor) {
                    entry.in_flight += 1;
                }
                (bundle, actor)
            };
            self.base.record(|m| m.on_input_dequeued(&bundle));
            if let Err(err) = self.submit_on_actor(bundle.clone(), actor) {
                let mut state = self.state();
                if let Some(entry) = state.actors.get_mut(&actor) {
                    entry.in_flight = entry.in_flight.saturating_sub(1);
                }
                state.input_queue.push_front(bundle.clone());
                drop(state);
                self.base.record(|m| m.on_input_queued(&bundle));
                return Err(err);
            }
        }
    }

    fn dispatch_logged(&self) {
        if let Err(err) = self.dispatch() {
            warn!("Failed to dispatch queued inputs of {}: {}", self.name(), err);
        }
    }

    fn submit_on_actor(&self, bundle: RefBundle, actor: ActorId) -> SluiceResult<()> {
        let substrate = Arc::clone(self.base.substrate());
        let task_index = self.base.tasks().next_index();
        let spec = TaskSpec::streaming(
            format!("{}-{}", self.name(), task_index),
            bundle.block_refs(),
            Arc::clone(&self.transform),
        )
        .on_actor(actor);
        let Waitable::Stream(stream) = substrate.submit(spec)? else {
            return Err(SluiceError::internal(
                "streaming submission returned a single-result handle",
            ));
        };

        self.base.record(|m| m.on_task_submitted(task_index, &bundle));
        self.state().task_inputs.insert(task_index, (bundle, actor));

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
        );
        self.base.tasks().insert(OpTask::Data(task), true);
        debug!(
            "Submitted task {} of {} to actor {}",
            task_index,
            self.name(),
            actor.0
        );
        Ok(())
    }
}

impl PhysicalOperator for ActorPoolMapOperator {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn on_start(&self, _options: &ExecutionOptions) -> SluiceResult<()> {
        let substrate = Arc::clone(self.base.substrate());
        let probe = self.data_context().actor_readiness_probe;
        for i in 0..self.pool_size {
            let (handle, ready) = substrate.create_actor(ActorSpec {
                name: format!("{}-actor-{}", self.name(), i),
                resources: self.actor_resources,
            })?;
            self.state().actors.insert(
                handle.id,
                ActorEntry {
                    state: ActorState::Pending,
                    ready: !probe,
                    in_flight: 0,
                },
            );
            if !probe {
                continue;
            }

            let task_index = self.base.tasks().next_index();
            let me = self.me.clone();
            let actor = handle.id;
            let task = MetadataOpTask::new(
                task_index,
                ready.object_ref(),
                Arc::clone(&substrate),
                Box::new(move |error| {
                    if let Some(op) = me.upgrade() {
                        op.on_actor_ready(task_index, actor, error);
                    }
                }),
            )
            .with_resources(self.actor_resources);
            self.base.tasks().insert(OpTask::Metadata(task), false);
        }
        // Without probes, actors are usable as soon as the substrate says so.
        if !probe {
            self.update_resource_usage();
        }
        Ok(())
    }

    fn add_input_inner(&self, bundle: RefBundle, _input_index: usize) -> SluiceResult<()> {
        self.base.record(|m| m.on_input_queued(&bundle));
        self.state().input_queue.push_back(bundle);
        self.dispatch()
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
        let actors: Vec<ActorId> = self.state().actors.keys().copied().collect();
        for actor in actors {
            if let Err(err) = self.base.substrate().kill_actor(actor) {
                warn!("Failed to kill actor {} of {}: {}", actor.0, self.name(), err);
            }
            if let Some(entry) = self.state().actors.get_mut(&actor) {
                entry.state = ActorState::Dead;
            }
        }
        let (task_inputs, queued, outputs) = {
            let mut state = self.state();
            let task_inputs: Vec<RefBundle> = if force {
                state.task_inputs.drain().map(|(_, (input, _))| input).collect()
            } else {
                Vec::new()
            };
            let queued: Vec<RefBundle> = state.input_queue.drain(..).collect();
            let outputs: Vec<RefBundle> = state.outputs.drain(..).collect();
            (task_inputs, queued, outputs)
        };
        for input in &task_inputs {
            release_input(&self.base, input);
        }
        discard_buffered(&self.base, queued, outputs);
        Ok(())
    }

    fn internal_queue_size(&self) -> usize {
        self.state().input_queue.len()
    }

    fn should_add_input(&self) -> bool {
        let state = self.state();
        state.free_slots(self.max_tasks_in_flight) > state.input_queue.len()
    }

    fn current_usage(&self) -> ExecutionResources {
        let live = self
            .state()
            .actors
            .values()
            .filter(|actor| actor.state != ActorState::Dead)
            .count();
        let memory = self.base.metrics().obj_store_mem_used() as f64;
        self.actor_resources
            .scale(live as f64)
            .add(&ExecutionResources::zero().with_object_store_memory(memory))
    }

    fn pending_usage(&self) -> ExecutionResources {
        let info = self.state().info();
        self.actor_resources.scale(info.pending as f64)
    }

    fn min_max_requirements(&self) -> (ExecutionResources, ExecutionResources) {
        let pool = self.actor_resources.scale(self.pool_size as f64);
        (pool, pool)
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
        ExecutionResources::zero().with_object_store_memory(expected_output_bytes)
    }

    fn update_resource_usage(&self) {
        let substrate = Arc::clone(self.base.substrate());
        let became_running = {
            let mut state = self.state();
            let mut became_running = false;
            for (id, entry) in &mut state.actors {
                if entry.state == ActorState::Dead {
                    continue;
                }
                let was_running = entry.is_running();
                let observed = substrate.actor_state(*id);
                // An actor stays pending until its readiness probe resolves.
                if !entry.ready && observed == ActorState::Alive {
                    continue;
                }
                entry.state = observed;
                became_running |= !was_running && entry.is_running();
            }
            became_running
        };
        if became_running {
            self.dispatch_logged();
        }
    }

    fn get_actor_info(&self) -> ActorPoolInfo {
        self.state().info()
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

    fn progress_str(&self) -> String {
        let info = self.get_actor_info();
        let mut progress = format!("{} actors", info.running);
        if info.pending > 0 {
            let _ = write!(progress, ", {} pending", info.pending);
        }
        if info.restarting > 0 {
            let _ = write!(progress, ", {} restarting", info.restarting);
        }
        progress
    }

    fn implements_accurate_memory_accounting(&self) -> bool {
        true
    }

    fn display(&self) -> String {
        format!(
            "ActorPoolMap[{}, actors={}]",
            self.transform.name(),
            self.pool_size
        )
    }
}
