//! Boundary to the remote execution substrate.
//!
//! The substrate runs submitted work somewhere else, stores the resulting
//! blocks, and lets the driver poll and cancel that work. Operators only talk
//! to it through [`ExecutionSubstrate`]; [`LocalSubstrate`] is an in-process
//! implementation used for embedding and tests.

mod local;

pub use local::{LocalSubstrate, SubmitMode, SubstrateStats};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use common_error::{SluiceError, SluiceResult};

use crate::bundle::{BlockMetadata, BlockReleaser};
use crate::resources::ExecutionResources;

/// Identifier of a task submitted to the substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

/// Identifier of an actor created on the substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub u64);

/// Reference to one object in the substrate's store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    id: u64,
    task_id: TaskId,
    actor_id: Option<ActorId>,
}

impl ObjectRef {
    /// Create a reference to an object produced by `task_id`.
    pub const fn new(id: u64, task_id: TaskId, actor_id: Option<ActorId>) -> Self {
        Self {
            id,
            task_id,
            actor_id,
        }
    }

    /// Object id.
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The task that produces this object.
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// The actor the producing task runs on, if any.
    pub const fn actor_id(&self) -> Option<ActorId> {
        self.actor_id
    }
}

/// Reference to a block stored on the substrate.
pub type BlockRef = ObjectRef;

/// Reference to a streaming task's output generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamRef(pub ObjectRef);

/// What the driver's wait primitive polls: one eventual result or a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Waitable {
    /// A single eventual result.
    Object(ObjectRef),
    /// A generator of results terminated by an end marker or an error.
    Stream(StreamRef),
}

impl Waitable {
    /// The underlying object ref (the generator's own ref for streams).
    pub const fn object_ref(&self) -> ObjectRef {
        match self {
            Self::Object(obj) | Self::Stream(StreamRef(obj)) => *obj,
        }
    }

    /// The task behind this waitable.
    pub const fn task_id(&self) -> TaskId {
        self.object_ref().task_id
    }

    /// Whether the work is bound to an actor.
    pub const fn is_actor_task(&self) -> bool {
        self.object_ref().actor_id.is_some()
    }
}

/// One poll of a streaming task's generator.
#[derive(Debug)]
pub enum StreamPoll {
    /// The next produced block.
    Ready {
        /// Ref of the produced block.
        block: BlockRef,
        /// Metadata of the produced block.
        metadata: BlockMetadata,
        /// Schema of the produced block.
        schema: Option<SchemaRef>,
    },
    /// Nothing available yet; the stream is still running.
    Pending,
    /// The stream ended normally and every item has been consumed.
    Finished,
    /// The stream ended with an error after the items already consumed.
    Failed(SluiceError),
}

/// User code applied by a task to its input blocks.
///
/// Outputs are handed to `emit` one at a time, so a transform that fails
/// midway still delivers the blocks it produced before the error.
pub trait BlockTransform: Send + Sync + fmt::Debug {
    /// Display name of the transform.
    fn name(&self) -> &str;

    /// Apply the transform to the task's inputs.
    fn apply(
        &self,
        inputs: Vec<RecordBatch>,
        emit: &mut dyn FnMut(RecordBatch),
    ) -> SluiceResult<()>;
}

type TransformFn =
    dyn Fn(Vec<RecordBatch>, &mut dyn FnMut(RecordBatch)) -> SluiceResult<()> + Send + Sync;

/// A [`BlockTransform`] backed by a closure.
pub struct FnTransform {
    name: String,
    func: Box<TransformFn>,
}

impl FnTransform {
    /// Wrap a closure as a transform.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Vec<RecordBatch>, &mut dyn FnMut(RecordBatch)) -> SluiceResult<()>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }

    /// A transform that re-emits its inputs unchanged.
    pub fn identity() -> Self {
        Self::new("identity", |inputs, emit| {
            for batch in inputs {
                emit(batch);
            }
            Ok(())
        })
    }
}

impl fmt::Debug for FnTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTransform")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl BlockTransform for FnTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(
        &self,
        inputs: Vec<RecordBatch>,
        emit: &mut dyn FnMut(RecordBatch),
    ) -> SluiceResult<()> {
        (self.func)(inputs, emit)
    }
}

/// How a task returns its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    /// One eventual result; produced blocks are discarded.
    Single,
    /// A stream of `(block, metadata)` items.
    Streaming,
}

/// Everything the substrate needs to run one task.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Task name for logs.
    pub name: String,
    /// Input blocks, fetched by the substrate before running.
    pub inputs: Vec<BlockRef>,
    /// Code to run.
    pub transform: Arc<dyn BlockTransform>,
    /// Resources reserved while the task runs.
    pub resources: ExecutionResources,
    /// How results are returned.
    pub returns: ReturnKind,
    /// Actor the task must run on.
    pub actor: Option<ActorId>,
}

impl TaskSpec {
    /// A streaming task over `inputs`.
    pub fn streaming(
        name: impl Into<String>,
        inputs: Vec<BlockRef>,
        transform: Arc<dyn BlockTransform>,
    ) -> Self {
        Self {
            name: name.into(),
            inputs,
            transform,
            resources: ExecutionResources::zero(),
            returns: ReturnKind::Streaming,
            actor: None,
        }
    }

    /// A single-result task over `inputs`.
    pub fn single(
        name: impl Into<String>,
        inputs: Vec<BlockRef>,
        transform: Arc<dyn BlockTransform>,
    ) -> Self {
        Self {
            returns: ReturnKind::Single,
            ..Self::streaming(name, inputs, transform)
        }
    }

    /// Reserve resources for the task.
    pub fn with_resources(mut self, resources: ExecutionResources) -> Self {
        self.resources = resources;
        self
    }

    /// Bind the task to an actor.
    pub fn on_actor(mut self, actor: ActorId) -> Self {
        self.actor = Some(actor);
        self
    }
}

/// Parameters for creating an actor.
#[derive(Debug, Clone)]
pub struct ActorSpec {
    /// Actor name for logs.
    pub name: String,
    /// Resources the actor holds for its lifetime.
    pub resources: ExecutionResources,
}

/// Handle to a created actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActorHandle {
    /// Actor id.
    pub id: ActorId,
}

/// Lifecycle state of an actor as seen by the substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    /// Created, not yet able to run tasks.
    Pending,
    /// Running tasks.
    Alive,
    /// Crashed and being restarted.
    Restarting,
    /// Gone for good.
    Dead,
}

/// The remote execution substrate.
///
/// All methods are called from the single driver thread. Only
/// [`wait`](Self::wait) with a non-zero timeout and [`get`](Self::get) may
/// block.
pub trait ExecutionSubstrate: BlockReleaser + Send + Sync + fmt::Debug {
    /// Submit a task and return the handle to wait on.
    fn submit(&self, spec: TaskSpec) -> SluiceResult<Waitable>;

    /// Split `waitables` into `(ready, pending)`, returning at most
    /// `num_returns` ready entries. Blocks for at most `timeout`.
    fn wait(
        &self,
        waitables: &[Waitable],
        num_returns: usize,
        timeout: Option<Duration>,
    ) -> SluiceResult<(Vec<Waitable>, Vec<Waitable>)>;

    /// Block until the work behind `waitable` terminates and return its outcome.
    fn get(&self, waitable: &Waitable) -> SluiceResult<()>;

    /// Fetch a stored block.
    fn get_block(&self, block: &BlockRef) -> SluiceResult<RecordBatch>;

    /// Poll a stream for its next item without blocking.
    fn try_next(&self, stream: &StreamRef) -> StreamPoll;

    /// Cancel the work behind `waitable`. `recursive` also cancels work it
    /// spawned; `force` kills the executing worker and is rejected for actor
    /// tasks.
    fn cancel(&self, waitable: &Waitable, recursive: bool, force: bool) -> SluiceResult<()>;

    /// Create an actor; the returned waitable resolves once it is ready.
    fn create_actor(&self, spec: ActorSpec) -> SluiceResult<(ActorHandle, Waitable)>;

    /// Current state of an actor.
    fn actor_state(&self, actor: ActorId) -> ActorState;

    /// Kill an actor. Work queued on it fails.
    fn kill_actor(&self, actor: ActorId) -> SluiceResult<()>;
}
