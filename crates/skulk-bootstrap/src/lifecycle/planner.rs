//! Bootstrap range planning: which blocks of a shard still need peers.

use crate::error::Result;
use crate::lifecycle::retention::{BlockState, RetentionOptions, RetentionWindow};
use crate::lifecycle::status::{BlockStatus, ShardBootstrapStatus};
use crate::model::{BlockWindow, Series, ShardBlockRange, ShardId, Timestamp};
use crate::reconcile::LocalPartial;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// What an earlier bootstrap stage produced for one block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PriorBlock {
    /// How completely the stage filled the block.
    pub status: BlockStatus,
    /// Data the stage recovered; may be partial.
    pub series: Vec<Series>,
}

/// Output of an earlier bootstrap stage (filesystem, commit log) for a shard.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PriorStageResult {
    shard: ShardId,
    blocks: BTreeMap<Timestamp, PriorBlock>,
}

impl PriorStageResult {
    /// Creates an empty result for `shard`.
    pub fn new(shard: ShardId) -> Self {
        Self {
            shard,
            blocks: BTreeMap::new(),
        }
    }

    /// Returns the shard.
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// Records that the stage fully satisfied a block.
    pub fn with_fulfilled(mut self, block_start: Timestamp) -> Self {
        self.blocks.insert(
            block_start,
            PriorBlock {
                status: BlockStatus::Fulfilled,
                series: Vec::new(),
            },
        );
        self
    }

    /// Records partial data the stage recovered for a block.
    pub fn with_partial(mut self, block_start: Timestamp, series: Vec<Series>) -> Self {
        self.blocks.insert(
            block_start,
            PriorBlock {
                status: BlockStatus::Degraded,
                series,
            },
        );
        self
    }

    /// Returns the entry for a block.
    pub fn block(&self, block_start: Timestamp) -> Option<&PriorBlock> {
        self.blocks.get(&block_start)
    }

    /// Returns the block statuses reported by the stage.
    pub fn status(&self) -> ShardBootstrapStatus {
        let mut status = ShardBootstrapStatus::new(self.shard);
        for (&start, block) in &self.blocks {
            status.raise(start, block.status);
        }
        status
    }
}

/// One (shard, block) unit of peer bootstrap work.
#[derive(Debug, Clone)]
pub struct BootstrapUnit {
    /// Shard.
    pub shard: ShardId,
    /// Block to fill.
    pub block: BlockWindow,
    /// Whether the block can still receive writes.
    pub state: BlockState,
    /// Status before this attempt.
    pub previous: BlockStatus,
    /// Partial data from a prior stage, merged as the lowest-priority source.
    pub local: Option<LocalPartial>,
}

/// Planned work for one shard.
#[derive(Debug, Clone, Default)]
pub struct ShardPlan {
    /// Blocks still requiring peer bootstrap.
    pub range: ShardBlockRange,
    /// One unit per block in `range`, in the same order.
    pub units: Vec<BootstrapUnit>,
    /// Blocks already fulfilled and skipped.
    pub skipped: Vec<Timestamp>,
}

/// Plans peer bootstrap ranges against a retention window.
#[derive(Debug, Clone)]
pub struct BootstrapRangePlanner {
    window: RetentionWindow,
}

impl BootstrapRangePlanner {
    /// Creates a planner for a precomputed window.
    pub fn new(window: RetentionWindow) -> Self {
        Self { window }
    }

    /// Creates a planner for `options` at `now`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the options are inconsistent; this
    /// happens before any work is planned.
    pub fn at(options: RetentionOptions, now: Timestamp) -> Result<Self> {
        Ok(Self::new(RetentionWindow::at(options, now)?))
    }

    /// Returns the retention window.
    pub fn window(&self) -> &RetentionWindow {
        &self.window
    }

    /// Plans the blocks of `shard` that still need peer bootstrap.
    ///
    /// A sealed block is skipped when `status` or the prior stage reports it
    /// fulfilled. Mutable blocks can still take writes and are planned on
    /// every run whatever their status, as are degraded and unfulfilled
    /// blocks. Partial data from the prior stage is attached to the unit of
    /// its block.
    pub fn plan(
        &self,
        shard: ShardId,
        status: &ShardBootstrapStatus,
        prior: Option<&PriorStageResult>,
    ) -> ShardPlan {
        let mut combined = status.clone();
        if let Some(prior) = prior {
            combined.merge(&prior.status());
            for (start, _) in prior.status().iter() {
                if !self.window.contains(start) {
                    debug!(shard, block_start = start, "ignoring prior result outside retention");
                }
            }
        }

        let mut plan = ShardPlan {
            range: ShardBlockRange {
                shard,
                block_starts: Vec::new(),
            },
            ..ShardPlan::default()
        };

        for block in self.window.blocks() {
            let previous = combined.get(block.start_ts);
            let state = self
                .window
                .state(block.start_ts)
                .unwrap_or(BlockState::Mutable);
            if previous.is_fulfilled() && state == BlockState::Sealed {
                plan.skipped.push(block.start_ts);
                continue;
            }

            let local = prior
                .and_then(|prior| prior.block(block.start_ts))
                .and_then(|prior_block| local_partial(shard, block, prior_block));

            plan.range.block_starts.push(block.start_ts);
            plan.units.push(BootstrapUnit {
                shard,
                block,
                state,
                previous,
                local,
            });
        }

        debug!(
            shard,
            planned = plan.units.len(),
            skipped = plan.skipped.len(),
            "planned peer bootstrap range"
        );
        plan
    }
}

fn local_partial(shard: ShardId, block: BlockWindow, prior: &PriorBlock) -> Option<LocalPartial> {
    let series: Vec<Series> = prior
        .series
        .iter()
        .filter(|series| match series.check_within(&block) {
            Ok(()) => true,
            Err(violation) => {
                warn!(
                    shard,
                    block_start = block.start_ts,
                    series = %series.id(),
                    %violation,
                    "dropping prior-stage series"
                );
                false
            }
        })
        .cloned()
        .collect();
    if series.iter().all(Series::is_empty) {
        return None;
    }
    Some(LocalPartial::new(shard, block, series))
}
