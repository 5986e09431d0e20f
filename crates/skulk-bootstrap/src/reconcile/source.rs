//! Uniform access to the data a source holds for one bootstrap unit.

use crate::model::{BlockWindow, Series, SeriesId, ShardId};
use crate::topology::PeerId;
use std::collections::BTreeMap;
use std::fmt;

/// Rank given to local data, prior stage or stored: below every peer.
pub const LOCAL_RANK: u32 = u32::MAX;

/// Where a source's data came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceOrigin {
    /// A remote replica.
    Peer(PeerId),
    /// Partial data produced by an earlier local bootstrap stage.
    Local,
    /// Data an earlier bootstrap run already persisted for the block.
    Stored,
}

impl fmt::Display for SourceOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peer(id) => write!(f, "peer:{id}"),
            Self::Local => f.write_str("local"),
            Self::Stored => f.write_str("stored"),
        }
    }
}

/// A source of series data for one (shard, block) unit.
///
/// The reconciler is written against this trait only; remote peer results
/// and local partial data are interchangeable inputs.
pub trait BlockDataSource: Send + Sync {
    /// Returns where the data came from.
    fn origin(&self) -> &SourceOrigin;

    /// Returns the priority rank; lower wins conflicts.
    fn rank(&self) -> u32;

    /// Returns the source's series for the unit, keyed by identifier.
    fn block_series(&self) -> &BTreeMap<SeriesId, Series>;

    /// Returns the datapoints the source holds for `id`, if any.
    fn series(&self, id: &SeriesId) -> Option<&Series> {
        self.block_series().get(id)
    }
}

/// Partial data for a unit handed over by a prior bootstrap stage.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalPartial {
    shard: ShardId,
    block: BlockWindow,
    series: BTreeMap<SeriesId, Series>,
    origin: SourceOrigin,
}

impl LocalPartial {
    /// Creates local partial data for a unit.
    pub fn new(
        shard: ShardId,
        block: BlockWindow,
        series: impl IntoIterator<Item = Series>,
    ) -> Self {
        let series = series
            .into_iter()
            .map(|series| (series.id().clone(), series))
            .collect();
        Self {
            shard,
            block,
            series,
            origin: SourceOrigin::Local,
        }
    }

    /// Creates local data for a unit from what the store already holds.
    ///
    /// Ranks with prior stage data but loses ties against it.
    pub fn stored(
        shard: ShardId,
        block: BlockWindow,
        series: impl IntoIterator<Item = Series>,
    ) -> Self {
        Self {
            origin: SourceOrigin::Stored,
            ..Self::new(shard, block, series)
        }
    }

    /// Returns the shard.
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// Returns the block.
    pub fn block(&self) -> &BlockWindow {
        &self.block
    }

    /// Returns the total number of datapoints.
    pub fn point_count(&self) -> usize {
        self.series.values().map(Series::len).sum()
    }
}

impl BlockDataSource for LocalPartial {
    fn origin(&self) -> &SourceOrigin {
        &self.origin
    }

    fn rank(&self) -> u32 {
        LOCAL_RANK
    }

    fn block_series(&self) -> &BTreeMap<SeriesId, Series> {
        &self.series
    }
}
