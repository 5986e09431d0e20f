//! Persistence of reconciled blocks and bootstrap status marks.
//!
//! The [`BootstrapSink`] writes a [`ReconciledBlock`] through a
//! [`BlockStore`] and marks the unit bootstrapped only once that write has
//! returned successfully. A failed write leaves the unit unmarked.

pub mod codec;
pub mod file;
pub mod memory;
pub mod status_log;

pub use codec::{decode_block, encode_block, StoredBlock};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use status_log::{StatusLog, StatusRecord};

use crate::error::{BootstrapError, Result};
use crate::lifecycle::{BlockStatus, ShardBootstrapStatus};
use crate::model::{NamespaceId, ShardId, Timestamp};
use crate::reconcile::ReconciledBlock;
use std::sync::Arc;
use tracing::{error, info};

/// Local storage for bootstrapped blocks.
///
/// Calls block; async callers should run them on a blocking thread.
pub trait BlockStore: Send + Sync + 'static {
    /// Durably writes a block, replacing any previous copy.
    fn write_block(&self, namespace: &NamespaceId, block: &ReconciledBlock) -> Result<()>;

    /// Durably records the bootstrap status of a block.
    fn mark_bootstrapped(
        &self,
        namespace: &NamespaceId,
        shard: ShardId,
        block_start: Timestamp,
        status: BlockStatus,
    ) -> Result<()>;

    /// Reads a block back, if present.
    fn read_block(
        &self,
        namespace: &NamespaceId,
        shard: ShardId,
        block_start: Timestamp,
    ) -> Result<Option<StoredBlock>>;

    /// Loads the recorded status of every block of a shard.
    fn load_status(&self, namespace: &NamespaceId, shard: ShardId) -> Result<ShardBootstrapStatus>;
}

/// Writes reconciled blocks for one namespace.
#[derive(Debug)]
pub struct BootstrapSink<S> {
    store: Arc<S>,
    namespace: NamespaceId,
}

impl<S> Clone for BootstrapSink<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            namespace: self.namespace.clone(),
        }
    }
}

impl<S: BlockStore> BootstrapSink<S> {
    /// Creates a sink writing to `store`.
    pub fn new(store: Arc<S>, namespace: NamespaceId) -> Self {
        Self { store, namespace }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the namespace.
    pub fn namespace(&self) -> &NamespaceId {
        &self.namespace
    }

    /// Persists `block`, then marks it with `status`.
    ///
    /// `status` must be [`BlockStatus::Fulfilled`] or [`BlockStatus::Degraded`].
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Persist`] if the write or the mark fails. The
    /// block is not marked unless its data was written.
    pub fn persist(&self, block: &ReconciledBlock, status: BlockStatus) -> Result<BlockStatus> {
        let shard = block.shard();
        let block_start = block.block().start_ts;
        let persist_err = |reason: String| BootstrapError::Persist {
            shard,
            block_start,
            reason,
        };

        if status == BlockStatus::Unfulfilled {
            return Err(persist_err("refusing to mark a block unfulfilled".into()));
        }

        if let Err(err) = self.store.write_block(&self.namespace, block) {
            error!(shard, block_start, error = %err, "failed to write bootstrapped block");
            return Err(persist_err(err.to_string()));
        }
        if let Err(err) = self
            .store
            .mark_bootstrapped(&self.namespace, shard, block_start, status)
        {
            error!(shard, block_start, error = %err, "failed to mark block bootstrapped");
            return Err(persist_err(err.to_string()));
        }

        info!(
            namespace = %self.namespace,
            shard,
            block_start,
            ?status,
            series = block.series().len(),
            points = block.stats().points,
            conflicts = block.conflicts().len(),
            "persisted bootstrapped block"
        );
        Ok(status)
    }
}
