//! On-disk encoding of a persisted block.
//!
//! # Layout
//!
//! ```text
//! +------------------------------------------------------------------+
//! | Header                                                           |
//! |   magic "SKBB" (4) | version u16 | shard u32 | start i64 |       |
//! |   size_nanos i64 | series_count u32                              |
//! +------------------------------------------------------------------+
//! | Series (repeated, ascending by id)                               |
//! |   id_len u32 | id bytes | point_count u32 |                      |
//! |   points: ts i64 | value bits u64 | has_annotation u8 |          |
//! |           [annotation_len u32 | annotation bytes]                |
//! +------------------------------------------------------------------+
//! | Footer: crc32 u32 over everything above                          |
//! +------------------------------------------------------------------+
//! ```
//!
//! All integers are little-endian. Encoding is deterministic: equal blocks
//! produce identical bytes.

use crate::error::{BootstrapError, Result};
use crate::model::{BlockWindow, Datapoint, Series, SeriesId, ShardId};
use crate::reconcile::ReconciledBlock;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::time::Duration;

/// Magic bytes at the start of every block file.
pub const BLOCK_MAGIC: [u8; 4] = *b"SKBB";

/// Current block file format version.
pub const BLOCK_VERSION: u16 = 1;

const HEADER_SIZE: usize = 4 + 2 + 4 + 8 + 8 + 4;
const FOOTER_SIZE: usize = 4;

/// A block as held by local storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlock {
    /// Shard.
    pub shard: ShardId,
    /// Block window.
    pub block: BlockWindow,
    /// Series keyed by identifier.
    pub series: BTreeMap<SeriesId, Series>,
}

impl StoredBlock {
    /// Creates a stored block from series.
    pub fn new(shard: ShardId, block: BlockWindow, series: impl IntoIterator<Item = Series>) -> Self {
        Self {
            shard,
            block,
            series: series
                .into_iter()
                .map(|series| (series.id().clone(), series))
                .collect(),
        }
    }

    /// Copies the merged series out of a reconciled block.
    pub fn from_reconciled(block: &ReconciledBlock) -> Self {
        Self {
            shard: block.shard(),
            block: *block.block(),
            series: block.series().clone(),
        }
    }

    /// Returns the total number of datapoints.
    pub fn point_count(&self) -> usize {
        self.series.values().map(Series::len).sum()
    }
}

/// Encodes a stored block.
pub fn encode_block(block: &StoredBlock) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + FOOTER_SIZE + block.point_count() * 17);
    buf.extend_from_slice(&BLOCK_MAGIC);
    buf.extend_from_slice(&BLOCK_VERSION.to_le_bytes());
    buf.extend_from_slice(&block.shard.to_le_bytes());
    buf.extend_from_slice(&block.block.start_ts.to_le_bytes());
    buf.extend_from_slice(&block.block.size_nanos().to_le_bytes());
    buf.extend_from_slice(&(block.series.len() as u32).to_le_bytes());

    for series in block.series.values() {
        let id = series.id().as_str().as_bytes();
        buf.extend_from_slice(&(id.len() as u32).to_le_bytes());
        buf.extend_from_slice(id);
        buf.extend_from_slice(&(series.len() as u32).to_le_bytes());
        for point in series.points() {
            buf.extend_from_slice(&point.timestamp.to_le_bytes());
            buf.extend_from_slice(&point.value.to_bits().to_le_bytes());
            match &point.annotation {
                Some(annotation) => {
                    buf.push(1);
                    buf.extend_from_slice(&(annotation.len() as u32).to_le_bytes());
                    buf.extend_from_slice(annotation);
                }
                None => buf.push(0),
            }
        }
    }

    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Decodes and verifies a stored block.
///
/// # Errors
///
/// Returns an error on checksum mismatch, bad magic, an unknown version, or
/// contents that violate series ordering or block bounds.
pub fn decode_block(bytes: &[u8]) -> Result<StoredBlock> {
    if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(BootstrapError::Corrupt(format!(
            "block file too short: {} bytes",
            bytes.len()
        )));
    }
    let (body, footer) = bytes.split_at(bytes.len() - FOOTER_SIZE);
    let expected = u32::from_le_bytes(read_array(&mut Cursor::new(footer))?);
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(BootstrapError::ChecksumMismatch { expected, actual });
    }

    let mut reader = Cursor::new(body);
    let magic: [u8; 4] = read_array(&mut reader)?;
    if magic != BLOCK_MAGIC {
        return Err(BootstrapError::InvalidMagic {
            expected: BLOCK_MAGIC,
            actual: magic,
        });
    }
    let version = u16::from_le_bytes(read_array(&mut reader)?);
    if version != BLOCK_VERSION {
        return Err(BootstrapError::UnsupportedVersion(version));
    }
    let shard = u32::from_le_bytes(read_array(&mut reader)?);
    let start_ts = i64::from_le_bytes(read_array(&mut reader)?);
    let size_nanos = i64::from_le_bytes(read_array(&mut reader)?);
    if size_nanos <= 0 {
        return Err(BootstrapError::Corrupt(format!(
            "invalid block size {size_nanos}"
        )));
    }
    let block = BlockWindow::new(start_ts, Duration::from_nanos(size_nanos as u64));
    let series_count = u32::from_le_bytes(read_array(&mut reader)?) as usize;

    let mut series = BTreeMap::new();
    for _ in 0..series_count {
        let id_len = u32::from_le_bytes(read_array(&mut reader)?) as usize;
        let id = String::from_utf8(read_vec(&mut reader, id_len)?)
            .map_err(|e| BootstrapError::Corrupt(format!("invalid UTF-8 in series id: {e}")))?;
        let point_count = u32::from_le_bytes(read_array(&mut reader)?) as usize;
        let mut points = Vec::with_capacity(point_count.min(body.len() / 17));
        for _ in 0..point_count {
            let timestamp = i64::from_le_bytes(read_array(&mut reader)?);
            let value = f64::from_bits(u64::from_le_bytes(read_array(&mut reader)?));
            let mut point = Datapoint::new(timestamp, value);
            let [has_annotation] = read_array::<1>(&mut reader)?;
            match has_annotation {
                0 => {}
                1 => {
                    let len = u32::from_le_bytes(read_array(&mut reader)?) as usize;
                    point = point.with_annotation(read_vec(&mut reader, len)?);
                }
                other => {
                    return Err(BootstrapError::Corrupt(format!(
                        "invalid annotation flag {other}"
                    )))
                }
            }
            points.push(point);
        }

        let decoded = Series::from_sorted(id, points)
            .map_err(|violation| BootstrapError::Corrupt(violation.to_string()))?;
        if let Some(point) = decoded.points().iter().find(|p| !block.contains(p.timestamp)) {
            return Err(BootstrapError::BlockMismatch {
                point_ts: point.timestamp,
                start: block.start_ts,
                end: block.end_ts(),
            });
        }
        series.insert(decoded.id().clone(), decoded);
    }

    if (reader.position() as usize) != body.len() {
        return Err(BootstrapError::Corrupt("trailing bytes after last series".into()));
    }

    Ok(StoredBlock {
        shard,
        block,
        series,
    })
}

fn read_array<const N: usize>(reader: &mut Cursor<&[u8]>) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader
        .read_exact(&mut buf)
        .map_err(|_| BootstrapError::Corrupt("truncated block file".into()))?;
    Ok(buf)
}

fn read_vec(reader: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>> {
    let remaining = reader.get_ref().len().saturating_sub(reader.position() as usize);
    if len > remaining {
        return Err(BootstrapError::Corrupt("truncated block file".into()));
    }
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .map_err(|_| BootstrapError::Corrupt("truncated block file".into()))?;
    Ok(buf)
}
