//! Per-shard, per-block bootstrap status records.
//!
//! Status is an explicit value: the planner reads it, the sink produces new
//! entries, and the coordinator hands the updated record back to the caller.
//! There is no process-wide registry.

use crate::model::{ShardId, Timestamp};
use std::collections::BTreeMap;

/// How completely a block has been bootstrapped.
///
/// Ordered from least to most complete so records can be combined with `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum BlockStatus {
    /// Nothing durable yet.
    #[default]
    Unfulfilled = 0,
    /// Persisted from an incomplete peer set; retry on the next attempt.
    Degraded = 1,
    /// Persisted from every expected source.
    Fulfilled = 2,
}

impl BlockStatus {
    /// Decodes a status byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unfulfilled),
            1 => Some(Self::Degraded),
            2 => Some(Self::Fulfilled),
            _ => None,
        }
    }

    /// Returns true if the block needs no further bootstrap.
    pub fn is_fulfilled(self) -> bool {
        self == Self::Fulfilled
    }
}

/// Bootstrap status of every known block of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShardBootstrapStatus {
    shard: ShardId,
    blocks: BTreeMap<Timestamp, BlockStatus>,
}

impl ShardBootstrapStatus {
    /// Creates an empty status record for `shard`.
    pub fn new(shard: ShardId) -> Self {
        Self {
            shard,
            blocks: BTreeMap::new(),
        }
    }

    /// Returns the shard this record describes.
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// Returns the status of a block; unknown blocks are unfulfilled.
    pub fn get(&self, block_start: Timestamp) -> BlockStatus {
        self.blocks.get(&block_start).copied().unwrap_or_default()
    }

    /// Overwrites the status of a block.
    pub fn set(&mut self, block_start: Timestamp, status: BlockStatus) {
        self.blocks.insert(block_start, status);
    }

    /// Raises the status of a block, never lowering it.
    pub fn raise(&mut self, block_start: Timestamp, status: BlockStatus) {
        let entry = self.blocks.entry(block_start).or_default();
        *entry = (*entry).max(status);
    }

    /// Combines two records, keeping the most complete status per block.
    pub fn merge(&mut self, other: &ShardBootstrapStatus) {
        for (&block_start, &status) in &other.blocks {
            self.raise(block_start, status);
        }
    }

    /// Iterates over known blocks in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (Timestamp, BlockStatus)> + '_ {
        self.blocks.iter().map(|(&start, &status)| (start, status))
    }

    /// Returns the block starts with the given status.
    pub fn blocks_with(&self, status: BlockStatus) -> Vec<Timestamp> {
        self.iter()
            .filter(|(_, s)| *s == status)
            .map(|(start, _)| start)
            .collect()
    }

    /// Returns the number of known blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns true if no block is known.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
