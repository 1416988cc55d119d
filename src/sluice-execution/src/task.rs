//! Handles over asynchronous work submitted by operators.
//!
//! A [`DataOpTask`] wraps a streaming task and forwards each produced block
//! to its operator as a [`RefBundle`]. A [`MetadataOpTask`] wraps a single
//! eventual result, such as an actor readiness probe. Both expose the
//! [`Waitable`] the driver polls and a cooperative or forced cancel.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;

use common_error::{SluiceError, SluiceResult};

use crate::bundle::RefBundle;
use crate::resources::ExecutionResources;
use crate::substrate::{ExecutionSubstrate, ObjectRef, StreamPoll, StreamRef, Waitable};

/// Invoked once per bundle drained from a streaming task.
pub type OutputReadyCallback = Box<dyn Fn(RefBundle) + Send + Sync>;

/// Invoked once when a task terminates, with the error if it failed.
pub type TaskDoneCallback = Box<dyn Fn(Option<&SluiceError>) + Send + Sync>;

/// A streaming task producing data blocks.
pub struct DataOpTask {
    task_index: usize,
    stream: StreamRef,
    resources: Option<ExecutionResources>,
    substrate: Arc<dyn ExecutionSubstrate>,
    output_ready: OutputReadyCallback,
    task_done: TaskDoneCallback,
    done: AtomicBool,
}

impl DataOpTask {
    /// Wrap a stream returned by the substrate.
    pub fn new(
        task_index: usize,
        stream: StreamRef,
        substrate: Arc<dyn ExecutionSubstrate>,
        output_ready: OutputReadyCallback,
        task_done: TaskDoneCallback,
    ) -> Self {
        Self {
            task_index,
            stream,
            resources: None,
            substrate,
            output_ready,
            task_done,
            done: AtomicBool::new(false),
        }
    }

    /// Attach the resources reserved for this task.
    pub fn with_resources(mut self, resources: ExecutionResources) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Drain ready outputs without blocking.
    ///
    /// Reads until nothing more is available, the stream ends, or at least
    /// `max_bytes` have been read (`None` reads everything available). Each
    /// block is passed to the output callback as an owned single-block
    /// bundle. When the stream ends, the done callback fires exactly once;
    /// if it ended with an error, that error is also returned.
    ///
    /// Returns the number of bytes read.
    pub fn on_data_ready(&self, max_bytes: Option<u64>) -> SluiceResult<u64> {
        let mut bytes_read = 0;
        while !self.is_done() && max_bytes.map_or(true, |max| bytes_read < max) {
            match self.substrate.try_next(&self.stream) {
                StreamPoll::Ready {
                    block,
                    metadata,
                    schema,
                } => {
                    let bundle = RefBundle::new(vec![(block, metadata)], true, schema);
                    bytes_read += bundle.size_bytes();
                    (self.output_ready)(bundle);
                }
                StreamPoll::Pending => break,
                StreamPoll::Finished => {
                    self.finish(None);
                    break;
                }
                StreamPoll::Failed(err) => {
                    self.finish(Some(&err));
                    return Err(err);
                }
            }
        }
        Ok(bytes_read)
    }

    fn finish(&self, error: Option<&SluiceError>) {
        if !self.done.swap(true, Ordering::SeqCst) {
            (self.task_done)(error);
        }
    }

    /// Whether the done callback has fired.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for DataOpTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataOpTask")
            .field("task_index", &self.task_index)
            .field("stream", &self.stream)
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}

/// A task returning a single result and no data.
pub struct MetadataOpTask {
    task_index: usize,
    object: ObjectRef,
    resources: Option<ExecutionResources>,
    substrate: Arc<dyn ExecutionSubstrate>,
    task_done: TaskDoneCallback,
    done: AtomicBool,
}

impl MetadataOpTask {
    /// Wrap a single-result object returned by the substrate.
    pub fn new(
        task_index: usize,
        object: ObjectRef,
        substrate: Arc<dyn ExecutionSubstrate>,
        task_done: TaskDoneCallback,
    ) -> Self {
        Self {
            task_index,
            object,
            resources: None,
            substrate,
            task_done,
            done: AtomicBool::new(false),
        }
    }

    /// Attach the resources reserved for this task.
    pub fn with_resources(mut self, resources: ExecutionResources) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Fetch the result once the driver saw it ready and fire the done callback.
    ///
    /// Only the first call has an effect. A failed result is passed to the
    /// callback and returned.
    pub fn on_task_finished(&self) -> SluiceResult<()> {
        if self.done.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.substrate.get(&Waitable::Object(self.object));
        (self.task_done)(result.as_ref().err());
        result
    }

    /// Whether the done callback has fired.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for MetadataOpTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataOpTask")
            .field("task_index", &self.task_index)
            .field("object", &self.object)
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}

/// One unit of in-flight work owned by an operator.
#[derive(Debug)]
pub enum OpTask {
    /// Streaming, data-producing work.
    Data(DataOpTask),
    /// Single-result work.
    Metadata(MetadataOpTask),
}

impl OpTask {
    /// Per-operator sequence number assigned at submission.
    pub fn task_index(&self) -> usize {
        match self {
            Self::Data(task) => task.task_index,
            Self::Metadata(task) => task.task_index,
        }
    }

    /// The handle the driver's wait primitive polls.
    pub fn waitable(&self) -> Waitable {
        match self {
            Self::Data(task) => Waitable::Stream(task.stream),
            Self::Metadata(task) => Waitable::Object(task.object),
        }
    }

    /// Resources reserved for this task, if any.
    pub fn requested_resources(&self) -> Option<ExecutionResources> {
        match self {
            Self::Data(task) => task.resources,
            Self::Metadata(task) => task.resources,
        }
    }

    /// The substrate running this task.
    pub fn substrate(&self) -> &Arc<dyn ExecutionSubstrate> {
        match self {
            Self::Data(task) => &task.substrate,
            Self::Metadata(task) => &task.substrate,
        }
    }

    /// Cancel the work and anything it spawned.
    ///
    /// Actor-bound work is only ever cancelled cooperatively: killing the
    /// worker would destroy actor state shared with other tasks.
    pub fn cancel(&self, force: bool) -> SluiceResult<()> {
        let waitable = self.waitable();
        let force = force && !waitable.is_actor_task();
        debug!(
            "Cancelling task {} ({:?}, force={})",
            self.task_index(),
            waitable.task_id(),
            force
        );
        self.substrate().cancel(&waitable, true, force)
    }

    /// The streaming variant, if this is one.
    pub fn as_data(&self) -> Option<&DataOpTask> {
        match self {
            Self::Data(task) => Some(task),
            Self::Metadata(_) => None,
        }
    }

    /// The single-result variant, if this is one.
    pub fn as_metadata(&self) -> Option<&MetadataOpTask> {
        match self {
            Self::Metadata(task) => Some(task),
            Self::Data(_) => None,
        }
    }
}
