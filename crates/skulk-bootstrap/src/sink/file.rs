//! Durable block store on the local filesystem.
//!
//! # Layout
//!
//! ```text
//! {root}/{namespace}/bootstrap.status
//! {root}/{namespace}/shard-{shard}/{block_start}.blk
//! ```
//!
//! # Durability
//!
//! Block files use the atomic write pattern:
//! 1. Write to `{block_start}.blk.tmp`
//! 2. fsync temp file
//! 3. fsync directory (file entry persistence)
//! 4. Atomic rename to final path
//! 5. fsync directory again (rename persistence)
//!
//! A status mark is appended to the namespace status log only after step 5,
//! so recovery never observes a mark whose block file is missing.

use crate::error::Result;
use crate::lifecycle::{BlockStatus, ShardBootstrapStatus};
use crate::model::{NamespaceId, ShardId, Timestamp};
use crate::reconcile::ReconciledBlock;
use crate::sink::codec::{decode_block, encode_block, StoredBlock};
use crate::sink::status_log::{StatusLog, StatusRecord};
use crate::sink::BlockStore;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Block file extension.
pub const BLOCK_EXTENSION: &str = "blk";

/// Status log file name inside each namespace directory.
pub const STATUS_LOG_FILE: &str = "bootstrap.status";

/// Filesystem-backed block store.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    logs: Mutex<HashMap<NamespaceId, StatusLog>>,
}

impl FileStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            logs: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory holding a shard's block files.
    pub fn shard_dir(&self, namespace: &NamespaceId, shard: ShardId) -> PathBuf {
        self.root
            .join(namespace.as_str())
            .join(format!("shard-{shard}"))
    }

    /// Returns the path of a block file.
    pub fn block_path(&self, namespace: &NamespaceId, shard: ShardId, block_start: Timestamp) -> PathBuf {
        self.shard_dir(namespace, shard)
            .join(format!("{block_start}.{BLOCK_EXTENSION}"))
    }

    fn status_log_path(&self, namespace: &NamespaceId) -> PathBuf {
        self.root.join(namespace.as_str()).join(STATUS_LOG_FILE)
    }

    fn with_log<T>(
        &self,
        namespace: &NamespaceId,
        f: impl FnOnce(&mut StatusLog) -> Result<T>,
    ) -> Result<T> {
        let mut logs = self.logs.lock().unwrap_or_else(|err| err.into_inner());
        let log = match logs.entry(namespace.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = self.status_log_path(namespace);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                entry.insert(StatusLog::open(&path)?)
            }
        };
        f(log)
    }
}

impl BlockStore for FileStore {
    fn write_block(&self, namespace: &NamespaceId, block: &ReconciledBlock) -> Result<()> {
        let dir = self.shard_dir(namespace, block.shard());
        fs::create_dir_all(&dir)?;

        let final_path = self.block_path(namespace, block.shard(), block.block().start_ts);
        let tmp_path = final_path.with_extension(format!("{BLOCK_EXTENSION}.tmp"));
        let bytes = encode_block(&StoredBlock::from_reconciled(block));

        let result = write_atomic(&dir, &tmp_path, &final_path, &bytes);
        if result.is_err() {
            if let Err(err) = fs::remove_file(&tmp_path) {
                if err.kind() != ErrorKind::NotFound {
                    warn!(path = %tmp_path.display(), error = %err, "failed to remove temp block file");
                }
            }
        }
        result?;

        debug!(
            path = %final_path.display(),
            bytes = bytes.len(),
            "wrote block file"
        );
        Ok(())
    }

    fn mark_bootstrapped(
        &self,
        namespace: &NamespaceId,
        shard: ShardId,
        block_start: Timestamp,
        status: BlockStatus,
    ) -> Result<()> {
        self.with_log(namespace, |log| {
            log.append(StatusRecord {
                shard,
                block_start,
                status,
            })
        })
    }

    fn read_block(
        &self,
        namespace: &NamespaceId,
        shard: ShardId,
        block_start: Timestamp,
    ) -> Result<Option<StoredBlock>> {
        let path = self.block_path(namespace, shard, block_start);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        decode_block(&bytes).map(Some)
    }

    fn load_status(&self, namespace: &NamespaceId, shard: ShardId) -> Result<ShardBootstrapStatus> {
        let records: Vec<StatusRecord> = self.with_log(namespace, |log| {
            Ok(log
                .records()
                .iter()
                .filter(|record| record.shard == shard)
                .copied()
                .collect())
        })?;

        let mut status = ShardBootstrapStatus::new(shard);
        for record in records {
            if self.block_path(namespace, shard, record.block_start).exists() {
                status.set(record.block_start, record.status);
            } else {
                warn!(
                    namespace = %namespace,
                    shard,
                    block_start = record.block_start,
                    "ignoring status mark without block file"
                );
            }
        }
        Ok(status)
    }
}

fn write_atomic(dir: &Path, tmp_path: &Path, final_path: &Path, bytes: &[u8]) -> Result<()> {
    // 1. Write to temp file
    let mut file = File::create(tmp_path)?;
    file.write_all(bytes)?;

    // 2. fsync temp file
    file.sync_all()?;
    drop(file);

    // 3. fsync directory (file entry persistence)
    File::open(dir)?.sync_all()?;

    // 4. Atomic rename
    fs::rename(tmp_path, final_path)?;

    // 5. fsync directory again (rename persistence)
    File::open(dir)?.sync_all()?;
    Ok(())
}
