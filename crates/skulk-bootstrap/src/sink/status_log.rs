//! Append-only log of bootstrap status marks for one namespace.
//!
//! Each record is framed as `len u32 | crc32 u32 | data`. A record is only
//! appended after the block file it refers to is durable, and the log is
//! fsynced after every append. On open, the log is replayed up to the first
//! incomplete or corrupt frame and truncated there, so a torn tail from a
//! crash is discarded.

use crate::error::{BootstrapError, Result};
use crate::lifecycle::BlockStatus;
use crate::model::{ShardId, Timestamp};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes at the start of a status log.
pub const STATUS_LOG_MAGIC: [u8; 4] = *b"SKBS";

/// Current status log format version.
pub const STATUS_LOG_VERSION: u16 = 1;

const HEADER_SIZE: u64 = 6;
const RECORD_SIZE: usize = 4 + 8 + 1;

/// One persisted status mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRecord {
    /// Shard.
    pub shard: ShardId,
    /// Block start.
    pub block_start: Timestamp,
    /// Status recorded for the block.
    pub status: BlockStatus,
}

impl StatusRecord {
    fn to_bytes(self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.shard.to_le_bytes());
        buf[4..12].copy_from_slice(&self.block_start.to_le_bytes());
        buf[12] = self.status as u8;
        buf
    }

    fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Result<Self> {
        let mut shard = [0u8; 4];
        shard.copy_from_slice(&bytes[0..4]);
        let mut block_start = [0u8; 8];
        block_start.copy_from_slice(&bytes[4..12]);
        let status = BlockStatus::from_u8(bytes[12])
            .ok_or_else(|| BootstrapError::Corrupt(format!("unknown block status {}", bytes[12])))?;
        Ok(Self {
            shard: u32::from_le_bytes(shard),
            block_start: i64::from_le_bytes(block_start),
            status,
        })
    }
}

/// An open status log.
#[derive(Debug)]
pub struct StatusLog {
    path: PathBuf,
    file: File,
    records: Vec<StatusRecord>,
}

impl StatusLog {
    /// Opens or creates the log at `path`, replaying existing records.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut len = file.metadata()?.len();
        if len > 0 && len < HEADER_SIZE {
            // A crash while the header was being written.
            warn!(path = %path.display(), len, "discarding torn status log header");
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            len = 0;
        }
        let (records, valid_len) = if len == 0 {
            file.write_all(&STATUS_LOG_MAGIC)?;
            file.write_all(&STATUS_LOG_VERSION.to_le_bytes())?;
            file.sync_all()?;
            (Vec::new(), HEADER_SIZE)
        } else {
            Self::replay(&mut file)?
        };

        if valid_len < len {
            warn!(
                path = %path.display(),
                discarded = len - valid_len,
                "truncating torn status log tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(valid_len))?;

        debug!(path = %path.display(), records = records.len(), "opened status log");
        Ok(Self {
            path,
            file,
            records,
        })
    }

    /// Returns the log path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns every record replayed or appended, oldest first.
    pub fn records(&self) -> &[StatusRecord] {
        &self.records
    }

    /// Appends a record and fsyncs the log.
    pub fn append(&mut self, record: StatusRecord) -> Result<()> {
        let data = record.to_bytes();
        let crc = crc32fast::hash(&data);
        let mut frame = Vec::with_capacity(8 + RECORD_SIZE);
        frame.extend_from_slice(&(RECORD_SIZE as u32).to_le_bytes());
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&data);
        self.file.write_all(&frame)?;
        self.file.sync_all()?;
        self.records.push(record);
        Ok(())
    }

    /// Reads valid records and returns them with the length they occupy.
    fn replay(file: &mut File) -> Result<(Vec<StatusRecord>, u64)> {
        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&*file);

        let mut header = [0u8; HEADER_SIZE as usize];
        reader.read_exact(&mut header)?;
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&header[0..4]);
        if magic != STATUS_LOG_MAGIC {
            return Err(BootstrapError::InvalidMagic {
                expected: STATUS_LOG_MAGIC,
                actual: magic,
            });
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != STATUS_LOG_VERSION {
            return Err(BootstrapError::UnsupportedVersion(version));
        }

        let mut records = Vec::new();
        let mut valid_len = HEADER_SIZE;
        loop {
            match Self::read_record(&mut reader) {
                Ok(Some(record)) => {
                    records.push(record);
                    valid_len += (8 + RECORD_SIZE) as u64;
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "stopping status log replay at invalid record");
                    break;
                }
            }
        }
        Ok((records, valid_len))
    }

    fn read_record<R: Read>(reader: &mut R) -> Result<Option<StatusRecord>> {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len != RECORD_SIZE {
            return Err(BootstrapError::Corrupt(format!(
                "status record size mismatch: expected {RECORD_SIZE}, got {len}"
            )));
        }

        let mut crc_buf = [0u8; 4];
        let mut data = [0u8; RECORD_SIZE];
        match reader
            .read_exact(&mut crc_buf)
            .and_then(|()| reader.read_exact(&mut data))
        {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let expected = u32::from_le_bytes(crc_buf);
        let actual = crc32fast::hash(&data);
        if expected != actual {
            return Err(BootstrapError::ChecksumMismatch { expected, actual });
        }
        StatusRecord::from_bytes(&data).map(Some)
    }
}
