//! In-process execution substrate.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use log::debug;

use common_error::{SluiceError, SluiceResult};

use super::{
    ActorHandle, ActorId, ActorSpec, ActorState, BlockRef, ExecutionSubstrate, ObjectRef,
    ReturnKind, StreamPoll, StreamRef, TaskId, TaskSpec, Waitable,
};
use crate::bundle::{BlockExecStats, BlockMetadata, BlockReleaser, RefBundle};

/// When submitted work runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitMode {
    /// Work runs inside `submit`/`create_actor`; results are ready on return.
    #[default]
    Eager,
    /// Work is queued until [`LocalSubstrate::run_next`] or
    /// [`LocalSubstrate::run_all`] is called, or a `get` needs it.
    Manual,
}

/// Call counters recorded by [`LocalSubstrate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubstrateStats {
    /// Tasks submitted.
    pub submitted: usize,
    /// Calls to `cancel`.
    pub cancel_calls: usize,
    /// Calls to `cancel` with `force = true`.
    pub forced_cancels: usize,
    /// Calls to `free`.
    pub free_calls: usize,
    /// Blocks released through `free`.
    pub freed_blocks: usize,
    /// Actors created.
    pub actors_created: usize,
    /// Actors killed.
    pub actors_killed: usize,
}

#[derive(Debug, Clone, Copy)]
enum FailureKind {
    Failed,
    Cancelled,
    ActorDied,
}

#[derive(Debug, Clone)]
struct Failure {
    kind: FailureKind,
    message: String,
}

impl Failure {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn to_error(&self) -> SluiceError {
        match self.kind {
            FailureKind::Failed => SluiceError::task_failed(self.message.clone()),
            FailureKind::Cancelled => SluiceError::task_cancelled(self.message.clone()),
            FailureKind::ActorDied => SluiceError::actor_died(self.message.clone()),
        }
    }
}

#[derive(Debug)]
enum ObjectSlot {
    Pending,
    Ready(Option<RecordBatch>),
    Failed(Failure),
}

#[derive(Debug)]
enum StreamStatus {
    Running,
    Finished,
    Failed(Failure),
}

#[derive(Debug)]
struct StreamSlot {
    items: VecDeque<(BlockRef, BlockMetadata, Option<SchemaRef>)>,
    status: StreamStatus,
}

#[derive(Debug)]
enum Work {
    Task { spec: TaskSpec, output: Waitable },
    ActorReady { actor: ActorId, output: ObjectRef },
}

impl Work {
    fn output(&self) -> Waitable {
        match self {
            Self::Task { output, .. } => *output,
            Self::ActorReady { output, .. } => Waitable::Object(*output),
        }
    }

    fn actor(&self) -> Option<ActorId> {
        match self {
            Self::Task { spec, .. } => spec.actor,
            Self::ActorReady { actor, .. } => Some(*actor),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    objects: HashMap<u64, ObjectSlot>,
    streams: HashMap<u64, StreamSlot>,
    queue: VecDeque<Work>,
    actors: HashMap<ActorId, ActorState>,
    stats: SubstrateStats,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Whether `id` was handed out already; a missing slot for it was retired.
    fn is_retired(&self, id: u64) -> bool {
        id != 0 && id <= self.next_id
    }

    fn is_pending(&self, waitable: &Waitable) -> bool {
        match waitable {
            Waitable::Object(obj) => matches!(self.objects.get(&obj.id()), Some(ObjectSlot::Pending)),
            Waitable::Stream(StreamRef(obj)) => matches!(
                self.streams.get(&obj.id()),
                Some(StreamSlot {
                    status: StreamStatus::Running,
                    ..
                })
            ),
        }
    }

    fn is_ready(&self, waitable: &Waitable) -> bool {
        match waitable {
            Waitable::Object(obj) => !matches!(self.objects.get(&obj.id()), Some(ObjectSlot::Pending)),
            Waitable::Stream(StreamRef(obj)) => match self.streams.get(&obj.id()) {
                Some(slot) => {
                    !slot.items.is_empty() || !matches!(slot.status, StreamStatus::Running)
                }
                None => true,
            },
        }
    }

    fn fail(&mut self, waitable: &Waitable, failure: Failure) {
        match waitable {
            Waitable::Object(obj) => {
                self.objects.insert(obj.id(), ObjectSlot::Failed(failure));
            }
            Waitable::Stream(StreamRef(obj)) => {
                if let Some(slot) = self.streams.get_mut(&obj.id()) {
                    slot.status = StreamStatus::Failed(failure);
                }
            }
        }
    }

    fn take_queued(&mut self, waitable: &Waitable) -> Option<Work> {
        let position = self.queue.iter().position(|work| work.output() == *waitable)?;
        self.queue.remove(position)
    }

    fn outcome(&self, waitable: &Waitable) -> Option<SluiceResult<()>> {
        match waitable {
            Waitable::Object(obj) => match self.objects.get(&obj.id()) {
                Some(ObjectSlot::Pending) => None,
                Some(ObjectSlot::Ready(_)) => Some(Ok(())),
                Some(ObjectSlot::Failed(failure)) => Some(Err(failure.to_error())),
                None if self.is_retired(obj.id()) => Some(Ok(())),
                None => Some(Err(SluiceError::value_error(format!(
                    "object {} is not in the store",
                    obj.id()
                )))),
            },
            Waitable::Stream(StreamRef(obj)) => match self.streams.get(&obj.id()).map(|s| &s.status) {
                Some(StreamStatus::Running) => None,
                Some(StreamStatus::Finished) => Some(Ok(())),
                Some(StreamStatus::Failed(failure)) => Some(Err(failure.to_error())),
                None if self.is_retired(obj.id()) => Some(Ok(())),
                None => Some(Err(SluiceError::value_error(format!(
                    "stream {} is unknown",
                    obj.id()
                )))),
            },
        }
    }
}

/// Deterministic in-process [`ExecutionSubstrate`].
///
/// Blocks live in a local object store keyed by object id. Depending on the
/// [`SubmitMode`], work runs at submission or waits in a queue until it is
/// run explicitly, which lets callers observe in-flight states. Every call to
/// `cancel` and `free` is counted in [`SubstrateStats`].
///
/// A stream is dropped from the store once it was polled to a clean finish,
/// and a block-less result once `get` returned it. Later queries on either
/// report success. Failed outcomes stay until the substrate is dropped.
#[derive(Debug, Default)]
pub struct LocalSubstrate {
    mode: SubmitMode,
    inner: Mutex<Inner>,
}

impl LocalSubstrate {
    /// Create a substrate with the given submission mode.
    pub fn new(mode: SubmitMode) -> Self {
        Self {
            mode,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Substrate that runs work at submission.
    pub fn eager() -> Self {
        Self::new(SubmitMode::Eager)
    }

    /// Substrate that queues work until it is run explicitly.
    pub fn manual() -> Self {
        Self::new(SubmitMode::Manual)
    }

    /// The submission mode.
    pub fn mode(&self) -> SubmitMode {
        self.mode
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("substrate lock poisoned")
    }

    /// Store a block and return its ref with derived metadata.
    pub fn put_block(&self, batch: RecordBatch) -> (BlockRef, BlockMetadata) {
        let metadata = BlockMetadata::from_batch(&batch);
        let mut inner = self.inner();
        let id = inner.next_id();
        inner.objects.insert(id, ObjectSlot::Ready(Some(batch)));
        (ObjectRef::new(id, TaskId(0), None), metadata)
    }

    /// Store every batch and wrap the refs into one bundle.
    pub fn put_bundle(&self, batches: Vec<RecordBatch>, owns_blocks: bool) -> RefBundle {
        let schema = batches.first().map(RecordBatch::schema);
        let blocks = batches.into_iter().map(|batch| self.put_block(batch)).collect();
        RefBundle::new(blocks, owns_blocks, schema)
    }

    /// Whether a block is still stored.
    pub fn contains_block(&self, block: &BlockRef) -> bool {
        matches!(
            self.inner().objects.get(&block.id()),
            Some(ObjectSlot::Ready(Some(_)))
        )
    }

    /// Number of objects and streams currently tracked.
    pub fn num_tracked(&self) -> usize {
        let inner = self.inner();
        inner.objects.len() + inner.streams.len()
    }

    /// Whether the work behind `waitable` has not terminated yet.
    pub fn is_pending(&self, waitable: &Waitable) -> bool {
        self.inner().is_pending(waitable)
    }

    /// Number of queued work items.
    pub fn queued(&self) -> usize {
        self.inner().queue.len()
    }

    /// Run the oldest queued work item. Returns false if the queue was empty.
    pub fn run_next(&self) -> bool {
        let work = self.inner().queue.pop_front();
        match work {
            Some(work) => {
                self.run(work);
                true
            }
            None => false,
        }
    }

    /// Run queued work until the queue is empty. Returns the number of items run.
    pub fn run_all(&self) -> usize {
        let mut count = 0;
        while self.run_next() {
            count += 1;
        }
        count
    }

    /// Call counters so far.
    pub fn stats(&self) -> SubstrateStats {
        self.inner().stats
    }

    /// Simulate an actor crash; it stays restarting until recovered.
    pub fn restart_actor(&self, actor: ActorId) {
        let mut inner = self.inner();
        if let Some(state) = inner.actors.get_mut(&actor) {
            if *state == ActorState::Alive {
                *state = ActorState::Restarting;
            }
        }
    }

    /// Bring a restarting actor back.
    pub fn recover_actor(&self, actor: ActorId) {
        let mut inner = self.inner();
        if let Some(state) = inner.actors.get_mut(&actor) {
            if *state == ActorState::Restarting {
                *state = ActorState::Alive;
            }
        }
    }

    fn run(&self, work: Work) {
        match work {
            Work::ActorReady { actor, output } => {
                let mut inner = self.inner();
                if inner.actors.get(&actor) == Some(&ActorState::Pending) {
                    inner.actors.insert(actor, ActorState::Alive);
                }
                inner.objects.insert(output.id(), ObjectSlot::Ready(None));
            }
            Work::Task { spec, output } => self.run_task(spec, output),
        }
    }

    fn run_task(&self, spec: TaskSpec, output: Waitable) {
        let inputs = {
            let mut inner = self.inner();
            if let Some(actor) = spec.actor {
                if inner.actors.get(&actor) == Some(&ActorState::Dead) {
                    let failure = Failure::new(
                        FailureKind::ActorDied,
                        format!("actor {} died before running '{}'", actor.0, spec.name),
                    );
                    inner.fail(&output, failure);
                    return;
                }
            }
            let mut inputs = Vec::with_capacity(spec.inputs.len());
            for block in &spec.inputs {
                match inner.objects.get(&block.id()) {
                    Some(ObjectSlot::Ready(Some(batch))) => inputs.push(batch.clone()),
                    _ => {
                        let failure = Failure::new(
                            FailureKind::Failed,
                            format!("input block {} of '{}' is not available", block.id(), spec.name),
                        );
                        inner.fail(&output, failure);
                        return;
                    }
                }
            }
            inputs
        };

        let started = Instant::now();
        let mut produced = Vec::new();
        let result = spec
            .transform
            .apply(inputs, &mut |batch| produced.push(batch));
        let wall_time = started.elapsed();

        let mut inner = self.inner();
        let task_id = output.task_id();
        match (spec.returns, output) {
            (ReturnKind::Streaming, Waitable::Stream(StreamRef(stream))) => {
                let mut items = Vec::with_capacity(produced.len());
                for batch in produced {
                    let id = inner.next_id();
                    let metadata = BlockMetadata::from_batch(&batch)
                        .with_exec_stats(BlockExecStats { wall_time });
                    let schema = Some(batch.schema());
                    inner.objects.insert(id, ObjectSlot::Ready(Some(batch)));
                    items.push((ObjectRef::new(id, task_id, spec.actor), metadata, schema));
                }
                if let Some(slot) = inner.streams.get_mut(&stream.id()) {
                    slot.items.extend(items);
                    slot.status = match result {
                        Ok(()) => StreamStatus::Finished,
                        Err(err) => StreamStatus::Failed(Failure::new(
                            FailureKind::Failed,
                            err.to_string(),
                        )),
                    };
                }
            }
            (_, output) => {
                match result {
                    Ok(()) => {
                        inner
                            .objects
                            .insert(output.object_ref().id(), ObjectSlot::Ready(None));
                    }
                    Err(err) => {
                        inner.fail(&output, Failure::new(FailureKind::Failed, err.to_string()));
                    }
                }
            }
        }
        debug!("Task '{}' ({:?}) ran in {:?}", spec.name, task_id, wall_time);
    }

    fn enqueue(&self, work: Work) {
        match self.mode {
            SubmitMode::Eager => self.run(work),
            SubmitMode::Manual => self.inner().queue.push_back(work),
        }
    }
}

impl BlockReleaser for LocalSubstrate {
    fn free(&self, blocks: &[BlockRef]) {
        let mut inner = self.inner();
        inner.stats.free_calls += 1;
        for block in blocks {
            if inner.objects.remove(&block.id()).is_some() {
                inner.stats.freed_blocks += 1;
            }
        }
    }
}

impl ExecutionSubstrate for LocalSubstrate {
    fn submit(&self, spec: TaskSpec) -> SluiceResult<Waitable> {
        let work = {
            let mut inner = self.inner();
            if let Some(actor) = spec.actor {
                if !inner.actors.contains_key(&actor) {
                    return Err(SluiceError::invalid_parameter(format!(
                        "unknown actor {}",
                        actor.0
                    )));
                }
            }
            inner.stats.submitted += 1;
            let task_id = TaskId(inner.next_id());
            let id = inner.next_id();
            let object = ObjectRef::new(id, task_id, spec.actor);
            let output = match spec.returns {
                ReturnKind::Single => {
                    inner.objects.insert(id, ObjectSlot::Pending);
                    Waitable::Object(object)
                }
                ReturnKind::Streaming => {
                    inner.streams.insert(
                        id,
                        StreamSlot {
                            items: VecDeque::new(),
                            status: StreamStatus::Running,
                        },
                    );
                    Waitable::Stream(StreamRef(object))
                }
            };
            Work::Task { spec, output }
        };
        let output = work.output();
        self.enqueue(work);
        Ok(output)
    }

    fn wait(
        &self,
        waitables: &[Waitable],
        num_returns: usize,
        _timeout: Option<Duration>,
    ) -> SluiceResult<(Vec<Waitable>, Vec<Waitable>)> {
        // Nothing progresses in the background here, so waiting longer than a
        // poll cannot change the answer.
        let inner = self.inner();
        let mut ready = Vec::new();
        let mut pending = Vec::new();
        for waitable in waitables {
            if ready.len() < num_returns && inner.is_ready(waitable) {
                ready.push(*waitable);
            } else {
                pending.push(*waitable);
            }
        }
        Ok((ready, pending))
    }

    fn get(&self, waitable: &Waitable) -> SluiceResult<()> {
        loop {
            let queued = {
                let mut inner = self.inner();
                if let Some(outcome) = inner.outcome(waitable) {
                    if let Waitable::Object(obj) = waitable {
                        if matches!(inner.objects.get(&obj.id()), Some(ObjectSlot::Ready(None))) {
                            inner.objects.remove(&obj.id());
                        }
                    }
                    return outcome;
                }
                inner.take_queued(waitable)
            };
            match queued {
                Some(work) => self.run(work),
                None => {
                    return Err(SluiceError::internal(format!(
                        "waiting on {waitable:?} would block forever"
                    )))
                }
            }
        }
    }

    fn get_block(&self, block: &BlockRef) -> SluiceResult<RecordBatch> {
        match self.inner().objects.get(&block.id()) {
            Some(ObjectSlot::Ready(Some(batch))) => Ok(batch.clone()),
            Some(ObjectSlot::Failed(failure)) => Err(failure.to_error()),
            _ => Err(SluiceError::value_error(format!(
                "block {} is not available",
                block.id()
            ))),
        }
    }

    fn try_next(&self, stream: &StreamRef) -> StreamPoll {
        let mut inner = self.inner();
        let id = stream.0.id();
        let retired = inner.is_retired(id);
        let Some(slot) = inner.streams.get_mut(&id) else {
            if retired {
                return StreamPoll::Finished;
            }
            return StreamPoll::Failed(SluiceError::value_error(format!(
                "stream {id} is unknown"
            )));
        };
        if let Some((block, metadata, schema)) = slot.items.pop_front() {
            return StreamPoll::Ready {
                block,
                metadata,
                schema,
            };
        }
        match &slot.status {
            StreamStatus::Running => return StreamPoll::Pending,
            StreamStatus::Failed(failure) => return StreamPoll::Failed(failure.to_error()),
            StreamStatus::Finished => {}
        }
        inner.streams.remove(&id);
        StreamPoll::Finished
    }

    fn cancel(&self, waitable: &Waitable, _recursive: bool, force: bool) -> SluiceResult<()> {
        // Tasks here never spawn nested work, so `recursive` has nothing extra to reach.
        let mut inner = self.inner();
        inner.stats.cancel_calls += 1;
        if force {
            inner.stats.forced_cancels += 1;
            if waitable.is_actor_task() {
                return Err(SluiceError::invalid_parameter(
                    "actor tasks cannot be force-cancelled",
                ));
            }
        }
        if inner.take_queued(waitable).is_some() {
            let failure = Failure::new(
                FailureKind::Cancelled,
                format!("task {:?} was cancelled", waitable.task_id()),
            );
            inner.fail(waitable, failure);
        }
        Ok(())
    }

    fn create_actor(&self, spec: ActorSpec) -> SluiceResult<(ActorHandle, Waitable)> {
        let (actor, work) = {
            let mut inner = self.inner();
            let actor = ActorId(inner.next_id());
            let task_id = TaskId(inner.next_id());
            let id = inner.next_id();
            inner.actors.insert(actor, ActorState::Pending);
            inner.objects.insert(id, ObjectSlot::Pending);
            inner.stats.actors_created += 1;
            debug!("Creating actor {} for '{}'", actor.0, spec.name);
            let work = Work::ActorReady {
                actor,
                output: ObjectRef::new(id, task_id, Some(actor)),
            };
            (actor, work)
        };
        let ready = work.output();
        self.enqueue(work);
        Ok((ActorHandle { id: actor }, ready))
    }

    fn actor_state(&self, actor: ActorId) -> ActorState {
        self.inner()
            .actors
            .get(&actor)
            .copied()
            .unwrap_or(ActorState::Dead)
    }

    fn kill_actor(&self, actor: ActorId) -> SluiceResult<()> {
        let mut inner = self.inner();
        if !inner.actors.contains_key(&actor) {
            return Err(SluiceError::invalid_parameter(format!(
                "unknown actor {}",
                actor.0
            )));
        }
        inner.actors.insert(actor, ActorState::Dead);
        inner.stats.actors_killed += 1;

        let (doomed, kept): (Vec<Work>, Vec<Work>) = inner
            .queue
            .drain(..)
            .partition(|work| work.actor() == Some(actor));
        inner.queue = kept.into();
        for work in doomed {
            let failure = Failure::new(FailureKind::ActorDied, format!("actor {} was killed", actor.0));
            inner.fail(&work.output(), failure);
        }
        Ok(())
    }
}
