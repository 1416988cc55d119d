//! Bundles of block references exchanged between operators.

use std::sync::Arc;
use std::time::Duration;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::substrate::BlockRef;

/// Execution statistics attached to a produced block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockExecStats {
    /// Wall time spent producing the block.
    pub wall_time: Duration,
}

/// Metadata describing one block without fetching it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockMetadata {
    /// Number of rows, if known.
    pub num_rows: Option<usize>,
    /// In-memory size in bytes, if known.
    pub size_bytes: Option<u64>,
    /// Files the block was read from.
    pub input_files: Vec<String>,
    /// Statistics recorded while producing the block.
    pub exec_stats: Option<BlockExecStats>,
}

impl BlockMetadata {
    /// Create metadata with known row count and size.
    pub fn new(num_rows: usize, size_bytes: u64) -> Self {
        Self {
            num_rows: Some(num_rows),
            size_bytes: Some(size_bytes),
            ..Self::default()
        }
    }

    /// Derive metadata from a materialized batch.
    pub fn from_batch(batch: &RecordBatch) -> Self {
        Self::new(batch.num_rows(), batch.get_array_memory_size() as u64)
    }

    /// Attach execution statistics.
    pub fn with_exec_stats(mut self, stats: BlockExecStats) -> Self {
        self.exec_stats = Some(stats);
        self
    }
}

/// Collaborator able to release blocks from the object store.
pub trait BlockReleaser {
    /// Release the given blocks. Refs that are already gone are ignored.
    fn free(&self, blocks: &[BlockRef]);
}

/// An ordered batch of `(block ref, metadata)` pairs plus ownership.
///
/// Cloning is cheap: the block list is shared. When `owns_blocks` is true the
/// consumer may free the blocks once processed; borrowed bundles must never
/// be freed by the receiver.
#[derive(Debug, Clone)]
pub struct RefBundle {
    blocks: Arc<[(BlockRef, BlockMetadata)]>,
    owns_blocks: bool,
    schema: Option<SchemaRef>,
}

impl RefBundle {
    /// Create a new bundle.
    pub fn new(
        blocks: Vec<(BlockRef, BlockMetadata)>,
        owns_blocks: bool,
        schema: Option<SchemaRef>,
    ) -> Self {
        Self {
            blocks: blocks.into(),
            owns_blocks,
            schema,
        }
    }

    /// The `(block ref, metadata)` pairs in order.
    pub fn blocks(&self) -> &[(BlockRef, BlockMetadata)] {
        &self.blocks
    }

    /// Block refs in order.
    pub fn block_refs(&self) -> Vec<BlockRef> {
        self.blocks.iter().map(|(block, _)| *block).collect()
    }

    /// Metadata in order.
    pub fn metadata(&self) -> impl Iterator<Item = &BlockMetadata> {
        self.blocks.iter().map(|(_, meta)| meta)
    }

    /// Whether the consumer owns the referenced blocks.
    pub fn owns_blocks(&self) -> bool {
        self.owns_blocks
    }

    /// Schema of the blocks, if known.
    pub fn schema(&self) -> Option<&SchemaRef> {
        self.schema.as_ref()
    }

    /// Number of blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Total rows, or `None` if any block's row count is unknown.
    pub fn num_rows(&self) -> Option<usize> {
        self.metadata().map(|meta| meta.num_rows).sum()
    }

    /// Total size of the blocks whose size is known.
    pub fn size_bytes(&self) -> u64 {
        self.metadata().filter_map(|meta| meta.size_bytes).sum()
    }

    /// Free the referenced blocks if this bundle owns them.
    ///
    /// Returns the number of bytes released, which is zero for borrowed bundles.
    pub fn destroy_if_owned<R: BlockReleaser + ?Sized>(&self, releaser: &R) -> u64 {
        if !self.owns_blocks {
            return 0;
        }
        releaser.free(&self.block_refs());
        self.size_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::substrate::{ObjectRef, TaskId};

    #[derive(Default)]
    struct RecordingReleaser {
        freed: Mutex<Vec<BlockRef>>,
    }

    impl BlockReleaser for RecordingReleaser {
        fn free(&self, blocks: &[BlockRef]) {
            self.freed.lock().unwrap().extend_from_slice(blocks);
        }
    }

    fn block(id: u64) -> BlockRef {
        ObjectRef::new(id, TaskId(0), None)
    }

    fn bundle(owns: bool) -> RefBundle {
        RefBundle::new(
            vec![
                (block(1), BlockMetadata::new(10, 100)),
                (block(2), BlockMetadata::new(5, 50)),
            ],
            owns,
            None,
        )
    }

    #[test]
    fn test_bundle_totals() {
        let b = bundle(true);
        assert_eq!(b.num_blocks(), 2);
        assert_eq!(b.num_rows(), Some(15));
        assert_eq!(b.size_bytes(), 150);
        assert_eq!(b.block_refs(), vec![block(1), block(2)]);
    }

    #[test]
    fn test_unknown_rows() {
        let b = RefBundle::new(
            vec![
                (block(1), BlockMetadata::new(10, 100)),
                (block(2), BlockMetadata::default()),
            ],
            false,
            None,
        );
        assert_eq!(b.num_rows(), None);
        assert_eq!(b.size_bytes(), 100);
    }

    #[test]
    fn test_destroy_if_owned() {
        let releaser = RecordingReleaser::default();
        assert_eq!(bundle(true).destroy_if_owned(&releaser), 150);
        assert_eq!(releaser.freed.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_borrowed_bundle_never_freed() {
        let releaser = RecordingReleaser::default();
        assert_eq!(bundle(false).destroy_if_owned(&releaser), 0);
        assert!(releaser.freed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_clone_shares_blocks() {
        let b = bundle(true);
        let c = b.clone();
        assert!(Arc::ptr_eq(&b.blocks, &c.blocks));
    }
}
