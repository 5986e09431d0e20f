//! Core data model shared by every bootstrap component.
//!
//! Timestamps are Unix nanoseconds. A [`Series`] always holds its datapoints
//! sorted strictly ascending by timestamp; the constructors either normalize
//! ([`Series::from_points`]) or validate ([`Series::from_sorted`]) to keep
//! that invariant.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Timestamp in nanoseconds since the Unix epoch.
pub type Timestamp = i64;

/// Shard identifier within a namespace.
pub type ShardId = u32;

/// Converts a duration to nanoseconds, saturating at `i64::MAX`.
pub fn duration_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

/// Aligns a timestamp down to the start of its block.
///
/// Uses floor division so pre-epoch timestamps align to the block that
/// actually contains them.
pub fn align_block_start(timestamp: Timestamp, block_size_nanos: i64) -> Timestamp {
    timestamp - timestamp.rem_euclid(block_size_nanos)
}

/// Identity of a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceId(String);

impl NamespaceId {
    /// Creates a namespace identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Series identifier, unique within a namespace and shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesId(String);

impl SeriesId {
    /// Creates a series identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SeriesId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SeriesId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single observed value of a series.
#[derive(Debug, Clone, PartialEq)]
pub struct Datapoint {
    /// Timestamp in nanoseconds.
    pub timestamp: Timestamp,
    /// Observed value.
    pub value: f64,
    /// Optional opaque annotation attached at write time.
    pub annotation: Option<Vec<u8>>,
}

impl Datapoint {
    /// Creates a datapoint without annotation.
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self {
            timestamp,
            value,
            annotation: None,
        }
    }

    /// Attaches an annotation to the datapoint.
    pub fn with_annotation(mut self, annotation: impl Into<Vec<u8>>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }

    /// Returns true if both points carry the same value and annotation.
    ///
    /// Values are compared by bit pattern, so two NaN writes of the same
    /// payload agree while `0.0` and `-0.0` do not.
    pub fn agrees_with(&self, other: &Datapoint) -> bool {
        self.value.to_bits() == other.value.to_bits() && self.annotation == other.annotation
    }
}

/// Reason a datapoint sequence cannot be accepted as a [`Series`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeriesViolation {
    /// Timestamps go backwards at the given position.
    #[error("timestamp {timestamp} at index {index} is out of order")]
    Unsorted {
        /// Position of the offending point.
        index: usize,
        /// Offending timestamp.
        timestamp: Timestamp,
    },
    /// The same timestamp appears twice.
    #[error("duplicate timestamp {0}")]
    Duplicate(Timestamp),
    /// A point falls outside the block it was reported for.
    #[error("timestamp {timestamp} outside block [{start}, {end})")]
    OutOfBlock {
        /// Offending timestamp.
        timestamp: Timestamp,
        /// Block start (inclusive).
        start: Timestamp,
        /// Block end (exclusive).
        end: Timestamp,
    },
}

/// A series and its datapoints, sorted and unique by timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    id: SeriesId,
    points: Vec<Datapoint>,
}

impl Series {
    /// Creates an empty series.
    pub fn new(id: impl Into<SeriesId>) -> Self {
        Self {
            id: id.into(),
            points: Vec::new(),
        }
    }

    /// Builds a series from points in any order.
    ///
    /// Points are sorted by timestamp; for repeated timestamps the first
    /// occurrence is kept.
    pub fn from_points(id: impl Into<SeriesId>, mut points: Vec<Datapoint>) -> Self {
        points.sort_by_key(|point| point.timestamp);
        points.dedup_by_key(|point| point.timestamp);
        Self {
            id: id.into(),
            points,
        }
    }

    /// Builds a series from points that must already be strictly ascending.
    pub fn from_sorted(
        id: impl Into<SeriesId>,
        points: Vec<Datapoint>,
    ) -> std::result::Result<Self, SeriesViolation> {
        for (index, pair) in points.windows(2).enumerate() {
            let (prev, next) = (pair[0].timestamp, pair[1].timestamp);
            if next == prev {
                return Err(SeriesViolation::Duplicate(next));
            }
            if next < prev {
                return Err(SeriesViolation::Unsorted {
                    index: index + 1,
                    timestamp: next,
                });
            }
        }
        Ok(Self {
            id: id.into(),
            points,
        })
    }

    /// Wraps points already known to be strictly ascending.
    pub(crate) fn from_sorted_unchecked(id: SeriesId, points: Vec<Datapoint>) -> Self {
        debug_assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        Self { id, points }
    }

    /// Returns the series identifier.
    pub fn id(&self) -> &SeriesId {
        &self.id
    }

    /// Returns the datapoints in timestamp order.
    pub fn points(&self) -> &[Datapoint] {
        &self.points
    }

    /// Consumes the series and returns its datapoints.
    pub fn into_points(self) -> Vec<Datapoint> {
        self.points
    }

    /// Returns the number of datapoints.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if the series has no datapoints.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns the datapoint at the given timestamp, if any.
    pub fn get(&self, timestamp: Timestamp) -> Option<&Datapoint> {
        self.points
            .binary_search_by_key(&timestamp, |point| point.timestamp)
            .ok()
            .map(|index| &self.points[index])
    }

    /// Checks that every point falls inside `block`.
    pub fn check_within(&self, block: &BlockWindow) -> std::result::Result<(), SeriesViolation> {
        // Sorted, so the endpoints are enough.
        for point in [self.points.first(), self.points.last()].into_iter().flatten() {
            if !block.contains(point.timestamp) {
                return Err(SeriesViolation::OutOfBlock {
                    timestamp: point.timestamp,
                    start: block.start_ts,
                    end: block.end_ts(),
                });
            }
        }
        Ok(())
    }
}

/// A fixed-width block `[start_ts, start_ts + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockWindow {
    /// Block start in nanoseconds, aligned to `size`.
    pub start_ts: Timestamp,
    /// Block width.
    pub size: Duration,
}

impl BlockWindow {
    /// Creates a block window starting at `start_ts`.
    pub fn new(start_ts: Timestamp, size: Duration) -> Self {
        Self { start_ts, size }
    }

    /// Returns the block that contains `timestamp`.
    pub fn containing(timestamp: Timestamp, size: Duration) -> Self {
        Self::new(align_block_start(timestamp, duration_nanos(size)), size)
    }

    /// Returns the block width in nanoseconds.
    pub fn size_nanos(&self) -> i64 {
        duration_nanos(self.size)
    }

    /// Returns the exclusive end timestamp.
    pub fn end_ts(&self) -> Timestamp {
        self.start_ts.saturating_add(self.size_nanos())
    }

    /// Returns true if `timestamp` falls inside the block.
    pub fn contains(&self, timestamp: Timestamp) -> bool {
        timestamp >= self.start_ts && timestamp < self.end_ts()
    }

    /// Returns true if the start is aligned to the block size.
    pub fn is_aligned(&self) -> bool {
        let size = self.size_nanos();
        size > 0 && self.start_ts.rem_euclid(size) == 0
    }
}

/// The unit of bootstrap work for one shard: ordered block starts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShardBlockRange {
    /// Shard the blocks belong to.
    pub shard: ShardId,
    /// Block starts, ascending and unique.
    pub block_starts: Vec<Timestamp>,
}

impl ShardBlockRange {
    /// Returns true if there is nothing to bootstrap.
    pub fn is_empty(&self) -> bool {
        self.block_starts.is_empty()
    }
}
