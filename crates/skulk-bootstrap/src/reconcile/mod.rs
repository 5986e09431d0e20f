//! Reconciliation of divergent replica views into one series set.
//!
//! Replicas receive writes without quorum confirmation, so two peers may hold
//! disjoint, overlapping or partially missing subsets of the same series in
//! the same block. [`reconcile`] takes every available source for a unit and
//! produces a [`ReconciledBlock`] holding, per series, the sorted union of all
//! datapoints.
//!
//! # Conflicts
//!
//! When two sources report different values at one timestamp, the value of
//! the source with the lowest rank (highest priority) is kept and every
//! differing value is recorded in the block's conflict set. Local partial data
//! always ranks last.
//!
//! # Determinism
//!
//! Sources are ordered by `(rank, origin)` before merging, so the output does
//! not depend on the order fetches completed in. Merging the same inputs twice
//! gives equal blocks.

pub mod source;

pub use source::{BlockDataSource, LocalPartial, SourceOrigin, LOCAL_RANK};

use crate::model::{BlockWindow, Datapoint, Series, SeriesId, ShardId, Timestamp};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// A value that lost a timestamp conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscardedValue {
    /// The losing datapoint.
    pub point: Datapoint,
    /// The source that reported it.
    pub source: SourceOrigin,
}

/// Two or more sources disagreeing on one (series, timestamp).
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    /// Affected series.
    pub series_id: SeriesId,
    /// Affected timestamp.
    pub timestamp: Timestamp,
    /// Datapoint kept in the output.
    pub kept: Datapoint,
    /// Source of the kept datapoint.
    pub kept_from: SourceOrigin,
    /// Every differing datapoint that was dropped, highest priority first.
    pub discarded: Vec<DiscardedValue>,
}

/// Counters describing one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Number of sources merged.
    pub sources: usize,
    /// Number of series in the output.
    pub series: usize,
    /// Number of datapoints in the output.
    pub points: usize,
    /// Timestamps reported by more than one source (agreeing or not).
    pub duplicates: usize,
    /// Entries in the conflict set.
    pub conflicts: usize,
}

/// The merged result for one (shard, block) unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledBlock {
    shard: ShardId,
    block: BlockWindow,
    series: BTreeMap<SeriesId, Series>,
    conflicts: Vec<Conflict>,
    stats: ReconcileStats,
}

impl ReconciledBlock {
    /// Creates a block from already-merged series, with no conflicts.
    pub fn from_series(
        shard: ShardId,
        block: BlockWindow,
        series: impl IntoIterator<Item = Series>,
    ) -> Self {
        let series: BTreeMap<SeriesId, Series> = series
            .into_iter()
            .filter(|series| !series.is_empty())
            .map(|series| (series.id().clone(), series))
            .collect();
        let stats = ReconcileStats {
            sources: 1,
            series: series.len(),
            points: series.values().map(Series::len).sum(),
            ..ReconcileStats::default()
        };
        Self {
            shard,
            block,
            series,
            conflicts: Vec::new(),
            stats,
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

    /// Returns the merged series keyed by identifier.
    pub fn series(&self) -> &BTreeMap<SeriesId, Series> {
        &self.series
    }

    /// Returns the conflict set, ordered by series then timestamp.
    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    /// Returns the merge counters.
    pub fn stats(&self) -> &ReconcileStats {
        &self.stats
    }

    /// Returns the peers involved in at least one conflict.
    pub fn conflicted_sources(&self) -> BTreeSet<SourceOrigin> {
        let mut sources = BTreeSet::new();
        for conflict in &self.conflicts {
            sources.insert(conflict.kept_from.clone());
            for discarded in &conflict.discarded {
                sources.insert(discarded.source.clone());
            }
        }
        sources
    }

    /// Returns true if no series survived the merge.
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// Merges every source for one unit into a [`ReconciledBlock`].
///
/// Sources that never mention a series contribute nothing to it; a series
/// that no source holds a datapoint for is absent from the result.
pub fn reconcile(
    shard: ShardId,
    block: BlockWindow,
    sources: &[&dyn BlockDataSource],
) -> ReconciledBlock {
    let mut ordered: Vec<&dyn BlockDataSource> = sources.to_vec();
    ordered.sort_by(|a, b| (a.rank(), a.origin()).cmp(&(b.rank(), b.origin())));

    let universe: BTreeSet<&SeriesId> = ordered
        .iter()
        .flat_map(|source| source.block_series().keys())
        .collect();

    let mut series = BTreeMap::new();
    let mut conflicts = Vec::new();
    let mut stats = ReconcileStats {
        sources: ordered.len(),
        ..ReconcileStats::default()
    };

    for id in universe {
        let contributions: Vec<(usize, &Series)> = ordered
            .iter()
            .enumerate()
            .filter_map(|(index, source)| source.series(id).map(|series| (index, series)))
            .filter(|(_, series)| !series.is_empty())
            .collect();
        if contributions.is_empty() {
            continue;
        }

        let merged = merge_series(&contributions);
        stats.duplicates += merged.duplicates;
        for (timestamp, kept_index, discarded) in merged.conflicts {
            let kept = merged.points[kept_index].clone();
            conflicts.push(Conflict {
                series_id: id.clone(),
                timestamp,
                kept_from: ordered[merged.sources[kept_index]].origin().clone(),
                kept,
                discarded: discarded
                    .into_iter()
                    .map(|(point, source)| DiscardedValue {
                        point,
                        source: ordered[source].origin().clone(),
                    })
                    .collect(),
            });
        }

        stats.points += merged.points.len();
        series.insert(id.clone(), Series::from_sorted_unchecked(id.clone(), merged.points));
    }

    stats.series = series.len();
    stats.conflicts = conflicts.len();
    if stats.conflicts > 0 {
        debug!(
            shard,
            block_start = block.start_ts,
            conflicts = stats.conflicts,
            "reconciled block with conflicting values"
        );
    }

    ReconciledBlock {
        shard,
        block,
        series,
        conflicts,
        stats,
    }
}

/// Output of merging one series.
struct SeriesMerge {
    points: Vec<Datapoint>,
    /// Source index (into the ordered source list) of each output point.
    sources: Vec<usize>,
    /// (timestamp, output index, differing losers with their source index).
    conflicts: Vec<(Timestamp, usize, Vec<(Datapoint, usize)>)>,
    duplicates: usize,
}

/// Merges one series' contributions, given as (source index, series) with
/// source index order equal to priority order.
fn merge_series(contributions: &[(usize, &Series)]) -> SeriesMerge {
    // Start from the most complete contribution to keep per-point work low;
    // any other baseline yields the same output.
    let baseline = contributions
        .iter()
        .enumerate()
        .max_by(|(_, (ia, a)), (_, (ib, b))| a.len().cmp(&b.len()).then(ib.cmp(ia)))
        .map(|(position, _)| position)
        .unwrap_or(0);

    let (base_source, base_series) = contributions[baseline];
    let mut merged: Vec<(Datapoint, usize)> = base_series
        .points()
        .iter()
        .map(|point| (point.clone(), base_source))
        .collect();
    let mut losers: BTreeMap<Timestamp, Vec<(Datapoint, usize)>> = BTreeMap::new();
    let mut duplicates = 0;

    for (position, &(source, series)) in contributions.iter().enumerate() {
        if position == baseline {
            continue;
        }
        merged = merge_sorted(merged, source, series.points(), &mut losers, &mut duplicates);
    }

    let (points, sources): (Vec<Datapoint>, Vec<usize>) = merged.into_iter().unzip();

    let mut conflicts = Vec::new();
    for (timestamp, mut candidates) in losers {
        let Ok(index) = points.binary_search_by_key(&timestamp, |point| point.timestamp) else {
            continue;
        };
        candidates.retain(|(point, _)| !point.agrees_with(&points[index]));
        if candidates.is_empty() {
            continue;
        }
        candidates.sort_by_key(|(_, source)| *source);
        conflicts.push((timestamp, index, candidates));
    }

    SeriesMerge {
        points,
        sources,
        conflicts,
        duplicates,
    }
}

/// Two-way merge of sorted sequences. On equal timestamps the lower source
/// index wins and the other point is parked in `losers`.
fn merge_sorted(
    current: Vec<(Datapoint, usize)>,
    source: usize,
    incoming: &[Datapoint],
    losers: &mut BTreeMap<Timestamp, Vec<(Datapoint, usize)>>,
    duplicates: &mut usize,
) -> Vec<(Datapoint, usize)> {
    let mut out = Vec::with_capacity(current.len() + incoming.len());
    let mut left = current.into_iter().peekable();
    let mut right = incoming.iter().peekable();

    loop {
        let order = match (left.peek(), right.peek()) {
            (Some((l, _)), Some(r)) => Some(l.timestamp.cmp(&r.timestamp)),
            _ => None,
        };
        match order {
            Some(Ordering::Less) => out.extend(left.next()),
            Some(Ordering::Greater) => out.extend(right.next().map(|p| (p.clone(), source))),
            Some(Ordering::Equal) => {
                let (Some(existing), Some(candidate)) = (left.next(), right.next()) else {
                    break;
                };
                let candidate = (candidate.clone(), source);
                *duplicates += 1;
                let (winner, loser) = if candidate.1 < existing.1 {
                    (candidate, existing)
                } else {
                    (existing, candidate)
                };
                losers.entry(winner.0.timestamp).or_default().push(loser);
                out.push(winner);
            }
            None => {
                out.extend(left);
                out.extend(right.map(|p| (p.clone(), source)));
                break;
            }
        }
    }

    out
}
