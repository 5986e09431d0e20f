//! Error and Result types for peer bootstrap operations.

use crate::model::{ShardId, Timestamp};
use std::io;
use thiserror::Error;

/// A convenience `Result` type for bootstrap operations.
pub type Result<T> = std::result::Result<T, BootstrapError>;

/// The error type for bootstrap operations.
///
/// Only [`BootstrapError::Config`] and [`BootstrapError::PersistenceFailed`]
/// halt a bootstrap run; everything else is scoped to a single unit.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Retention, fetch or coordinator settings are internally inconsistent.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Invalid magic bytes in a block file or status log header.
    #[error("Invalid magic bytes: expected {expected:?}, got {actual:?}")]
    InvalidMagic {
        /// Expected magic bytes.
        expected: [u8; 4],
        /// Magic bytes found on disk.
        actual: [u8; 4],
    },

    /// Unsupported on-disk format version.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// Stored checksum does not match the computed one.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Expected CRC32 checksum.
        expected: u32,
        /// Actual computed CRC32 checksum.
        actual: u32,
    },

    /// Stored data could not be decoded.
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// A datapoint does not belong to the block it was placed in.
    #[error("Block mismatch: point timestamp {point_ts} not in block [{start}, {end})")]
    BlockMismatch {
        /// Timestamp of the datapoint.
        point_ts: Timestamp,
        /// Start timestamp of the block (inclusive).
        start: Timestamp,
        /// End timestamp of the block (exclusive).
        end: Timestamp,
    },

    /// Every unit that reached the sink failed to persist.
    #[error("Persistence failed for all {failed} bootstrap units")]
    PersistenceFailed {
        /// Number of units whose persistence failed.
        failed: usize,
    },

    /// Writing a unit to the local store failed.
    #[error("Failed to persist shard {shard} block {block_start}: {reason}")]
    Persist {
        /// Shard of the unit.
        shard: ShardId,
        /// Block start of the unit.
        block_start: Timestamp,
        /// Underlying failure.
        reason: String,
    },

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl BootstrapError {
    /// Returns true if this error must stop the whole bootstrap run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::PersistenceFailed { .. })
    }
}
