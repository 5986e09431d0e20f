//! In-memory block store.

use crate::error::Result;
use crate::lifecycle::{BlockStatus, ShardBootstrapStatus};
use crate::model::{NamespaceId, Series, ShardId, Timestamp};
use crate::reconcile::ReconciledBlock;
use crate::sink::codec::StoredBlock;
use crate::sink::BlockStore;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

type BlockKey = (NamespaceId, ShardId, Timestamp);

/// Block store held entirely in memory.
///
/// Serves reads for an in-process node and stands in for disk in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blocks: RwLock<HashMap<BlockKey, StoredBlock>>,
    status: RwLock<HashMap<(NamespaceId, ShardId), ShardBootstrapStatus>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes series directly into a block, merging with what is there.
    ///
    /// Existing points win on timestamp collisions. Used to seed nodes that
    /// received writes rather than bootstrapping.
    pub fn insert(&self, namespace: &NamespaceId, block: StoredBlock) {
        let mut blocks = self.blocks.write().unwrap_or_else(|err| err.into_inner());
        let key = (namespace.clone(), block.shard, block.block.start_ts);
        match blocks.get_mut(&key) {
            Some(existing) => {
                for (id, series) in block.series {
                    let merged = match existing.series.remove(&id) {
                        Some(current) => {
                            let mut points = current.into_points();
                            points.extend(series.into_points());
                            Series::from_points(id.clone(), points)
                        }
                        None => series,
                    };
                    existing.series.insert(id, merged);
                }
            }
            None => {
                blocks.insert(key, block);
            }
        }
    }

    /// Returns the block starts held for a shard, ascending.
    pub fn block_starts(&self, namespace: &NamespaceId, shard: ShardId) -> Vec<Timestamp> {
        let blocks = self.blocks.read().unwrap_or_else(|err| err.into_inner());
        let mut starts: Vec<Timestamp> = blocks
            .keys()
            .filter(|(ns, s, _)| ns == namespace && *s == shard)
            .map(|(_, _, start)| *start)
            .collect();
        starts.sort_unstable();
        starts
    }

    /// Returns every block held for a shard, keyed by start.
    pub fn blocks(&self, namespace: &NamespaceId, shard: ShardId) -> BTreeMap<Timestamp, StoredBlock> {
        let blocks = self.blocks.read().unwrap_or_else(|err| err.into_inner());
        blocks
            .iter()
            .filter(|((ns, s, _), _)| ns == namespace && *s == shard)
            .map(|((_, _, start), block)| (*start, block.clone()))
            .collect()
    }
}

impl BlockStore for MemoryStore {
    fn write_block(&self, namespace: &NamespaceId, block: &ReconciledBlock) -> Result<()> {
        let stored = StoredBlock::from_reconciled(block);
        let mut blocks = self.blocks.write().unwrap_or_else(|err| err.into_inner());
        blocks.insert(
            (namespace.clone(), stored.shard, stored.block.start_ts),
            stored,
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
        let mut records = self.status.write().unwrap_or_else(|err| err.into_inner());
        records
            .entry((namespace.clone(), shard))
            .or_insert_with(|| ShardBootstrapStatus::new(shard))
            .set(block_start, status);
        Ok(())
    }

    fn read_block(
        &self,
        namespace: &NamespaceId,
        shard: ShardId,
        block_start: Timestamp,
    ) -> Result<Option<StoredBlock>> {
        let blocks = self.blocks.read().unwrap_or_else(|err| err.into_inner());
        Ok(blocks.get(&(namespace.clone(), shard, block_start)).cloned())
    }

    fn load_status(&self, namespace: &NamespaceId, shard: ShardId) -> Result<ShardBootstrapStatus> {
        let records = self.status.read().unwrap_or_else(|err| err.into_inner());
        Ok(records
            .get(&(namespace.clone(), shard))
            .cloned()
            .unwrap_or_else(|| ShardBootstrapStatus::new(shard)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BlockWindow, Datapoint};
    use std::time::Duration;

    #[test]
    fn test_insert_merges_points() {
        let store = MemoryStore::new();
        let ns = NamespaceId::new("metrics");
        let block = BlockWindow::new(0, Duration::from_secs(60));
        store.insert(
            &ns,
            StoredBlock::new(1, block, vec![Series::from_points("a", vec![Datapoint::new(2, 1.0)])]),
        );
        store.insert(
            &ns,
            StoredBlock::new(
                1,
                block,
                vec![Series::from_points(
                    "a",
                    vec![Datapoint::new(1, 0.0), Datapoint::new(2, 9.0)],
                )],
            ),
        );

        let stored = store.read_block(&ns, 1, 0).unwrap().unwrap();
        let points = stored.series.values().next().unwrap().points().to_vec();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].value, 1.0);
        assert_eq!(store.block_starts(&ns, 1), vec![0]);
    }

    #[test]
    fn test_status_round_trip() {
        let store = MemoryStore::new();
        let ns = NamespaceId::new("metrics");
        store.mark_bootstrapped(&ns, 4, 0, BlockStatus::Degraded).unwrap();
        store.mark_bootstrapped(&ns, 4, 0, BlockStatus::Fulfilled).unwrap();

        let status = store.load_status(&ns, 4).unwrap();
        assert_eq!(status.get(0), BlockStatus::Fulfilled);
        assert!(store.load_status(&ns, 5).unwrap().is_empty());
    }
}
