//! Per-unit and per-run bootstrap reports.

use crate::fetch::FetchStatus;
use crate::lifecycle::{BlockState, BlockStatus, ShardBootstrapStatus};
use crate::model::{ShardId, Timestamp};
use crate::topology::PeerId;
use std::collections::BTreeMap;
use std::time::Duration;

/// What happened to a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Merged data was written and marked.
    Persisted,
    /// Writing or marking failed; the unit stays unmarked.
    PersistFailed(String),
    /// Shutdown interrupted the unit and the policy discarded its data.
    Aborted,
    /// Shutdown arrived before the unit started.
    Skipped,
}

/// Observations from one (shard, block) unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitReport {
    /// Shard.
    pub shard: ShardId,
    /// Block start.
    pub block_start: Timestamp,
    /// Whether the block was still mutable.
    pub state: BlockState,
    /// Status after the unit.
    pub status: BlockStatus,
    /// Outcome of the unit.
    pub outcome: UnitOutcome,
    /// Fetch status of every peer in the peer set, in rank order.
    pub peers: Vec<(PeerId, FetchStatus)>,
    /// Peers that returned [`FetchStatus::Success`].
    pub peers_succeeded: usize,
    /// Peers involved in at least one conflict.
    pub peers_conflicted: usize,
    /// Entries in the conflict set.
    pub conflicts: usize,
    /// Series in the merged block.
    pub series: usize,
    /// Datapoints in the merged block.
    pub points: usize,
    /// Series dropped as malformed across all peers.
    pub malformed: usize,
    /// Whether a prior stage contributed local partial data.
    pub used_local: bool,
    /// Whether data persisted by an earlier run was merged back in.
    pub used_stored: bool,
    /// Wall time spent on the unit.
    pub elapsed: Duration,
}

impl UnitReport {
    pub(crate) fn new(shard: ShardId, block_start: Timestamp, state: BlockState, status: BlockStatus) -> Self {
        Self {
            shard,
            block_start,
            state,
            status,
            outcome: UnitOutcome::Skipped,
            peers: Vec::new(),
            peers_succeeded: 0,
            peers_conflicted: 0,
            conflicts: 0,
            series: 0,
            points: 0,
            malformed: 0,
            used_local: false,
            used_stored: false,
            elapsed: Duration::ZERO,
        }
    }

    /// Returns the number of peers contacted.
    pub fn peers_contacted(&self) -> usize {
        self.peers.len()
    }

    /// Returns the number of peers that did not return a complete view.
    pub fn peers_failed(&self) -> usize {
        self.peers_contacted() - self.peers_succeeded
    }

    /// Returns true if persistence was attempted.
    pub fn attempted_persist(&self) -> bool {
        matches!(
            self.outcome,
            UnitOutcome::Persisted | UnitOutcome::PersistFailed(_)
        )
    }
}

/// Result of a bootstrap run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BootstrapReport {
    units: Vec<UnitReport>,
    shards: BTreeMap<ShardId, ShardBootstrapStatus>,
    skipped_blocks: usize,
}

impl BootstrapReport {
    pub(crate) fn new(
        mut units: Vec<UnitReport>,
        shards: BTreeMap<ShardId, ShardBootstrapStatus>,
        skipped_blocks: usize,
    ) -> Self {
        units.sort_by_key(|unit| (unit.shard, unit.block_start));
        Self {
            units,
            shards,
            skipped_blocks,
        }
    }

    /// Returns every unit report, ordered by shard then block start.
    pub fn units(&self) -> &[UnitReport] {
        &self.units
    }

    /// Returns the report for one unit.
    pub fn unit(&self, shard: ShardId, block_start: Timestamp) -> Option<&UnitReport> {
        self.units
            .iter()
            .find(|unit| unit.shard == shard && unit.block_start == block_start)
    }

    /// Returns the updated status of a shard.
    pub fn shard_status(&self, shard: ShardId) -> Option<&ShardBootstrapStatus> {
        self.shards.get(&shard)
    }

    /// Returns the updated status of every shard.
    pub fn shard_statuses(&self) -> &BTreeMap<ShardId, ShardBootstrapStatus> {
        &self.shards
    }

    /// Returns the number of blocks skipped as already fulfilled.
    pub fn skipped_blocks(&self) -> usize {
        self.skipped_blocks
    }

    /// Returns the number of units that ended with `status`.
    pub fn count(&self, status: BlockStatus) -> usize {
        self.units.iter().filter(|unit| unit.status == status).count()
    }

    /// Returns the number of units whose persistence failed.
    pub fn persist_failures(&self) -> usize {
        self.units
            .iter()
            .filter(|unit| matches!(unit.outcome, UnitOutcome::PersistFailed(_)))
            .count()
    }

    /// Returns the total conflicts across units.
    pub fn total_conflicts(&self) -> usize {
        self.units.iter().map(|unit| unit.conflicts).sum()
    }

    /// Returns true if every planned unit ended fulfilled.
    pub fn is_complete(&self) -> bool {
        self.units.iter().all(|unit| unit.status.is_fulfilled())
    }
}
