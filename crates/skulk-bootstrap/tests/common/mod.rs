//! In-process cluster used by the integration tests.

#![allow(dead_code)]

use alopex_skulk_bootstrap::fetch::serve_fetch;
use alopex_skulk_bootstrap::{
    BlockWindow, BootstrapConfig, Datapoint, FetchConfig, FetchError, FetchRequest,
    FetchResponse, MemoryStore, NamespaceId, PeerClient, PeerHost, PeerId, RetentionOptions,
    RetryPolicy, Series, StaticTopology, StoredBlock, Timestamp,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SECOND: i64 = 1_000_000_000;
pub const MINUTE: i64 = 60 * SECOND;
pub const HOUR: i64 = 60 * MINUTE;
pub const BLOCK: i64 = 2 * HOUR;

/// Start of the block containing "now" in every scenario.
pub const T: Timestamp = 100 * HOUR;
/// Scenario clock: half an hour into block `T`.
pub const NOW: Timestamp = T + 30 * MINUTE;

pub fn namespace() -> NamespaceId {
    NamespaceId::new("testns")
}

pub fn retention() -> RetentionOptions {
    RetentionOptions::default()
        .with_retention_period(Duration::from_secs(6 * 3600))
        .with_block_size(Duration::from_secs(2 * 3600))
        .with_buffer_past(Duration::from_secs(10 * 60))
        .with_buffer_future(Duration::from_secs(2 * 60))
}

pub fn config() -> BootstrapConfig {
    BootstrapConfig::new("testns")
        .with_retention(retention())
        .with_fetch(
            FetchConfig::default()
                .with_request_timeout(Duration::from_secs(1))
                .with_page_size(1)
                .with_retry(
                    RetryPolicy::default()
                        .with_max_attempts(2)
                        .with_initial_backoff(Duration::from_millis(1))
                        .with_max_backoff(Duration::from_millis(2)),
                ),
        )
        .with_unit_deadline(Duration::from_secs(10))
}

pub fn window(start: Timestamp) -> BlockWindow {
    BlockWindow::new(start, Duration::from_secs(2 * 3600))
}

/// One point per second from the block start, valued by index.
pub fn generate(count: usize, start: Timestamp) -> Vec<Datapoint> {
    (0..count)
        .map(|i| Datapoint::new(start + i as i64 * SECOND, i as f64))
        .collect()
}

/// Keeps the points whose index satisfies `keep`.
pub fn select(points: &[Datapoint], keep: impl Fn(usize) -> bool) -> Vec<Datapoint> {
    points
        .iter()
        .enumerate()
        .filter(|(i, _)| keep(*i))
        .map(|(_, point)| point.clone())
        .collect()
}

pub fn seed(store: &MemoryStore, shard: u32, start: Timestamp, id: &str, points: Vec<Datapoint>) {
    store.insert(
        &namespace(),
        StoredBlock::new(shard, window(start), vec![Series::from_points(id, points)]),
    );
}

pub fn host(id: &str) -> PeerHost {
    PeerHost::new(id, format!("{id}.cluster.local:9000"))
}

pub fn topology(shards: &[u32], nodes: &[&str]) -> StaticTopology {
    let hosts: Vec<PeerHost> = nodes.iter().map(|id| host(id)).collect();
    StaticTopology::new().with_replica_set(shards.iter().copied(), &hosts)
}

/// Routes fetch requests to in-memory nodes.
#[derive(Default)]
pub struct InProcessCluster {
    nodes: HashMap<PeerId, Arc<MemoryStore>>,
    down: Mutex<HashSet<PeerId>>,
    stalled: Mutex<HashSet<PeerId>>,
    requests: AtomicUsize,
}

impl InProcessCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, id: &str, store: Arc<MemoryStore>) -> Self {
        self.nodes.insert(PeerId::new(id), store);
        self
    }

    pub fn take_down(&self, id: &str) {
        self.down.lock().unwrap().insert(PeerId::new(id));
    }

    /// Makes every request to `id` hang until the caller gives up.
    pub fn stall(&self, id: &str) {
        self.stalled.lock().unwrap().insert(PeerId::new(id));
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl PeerClient for InProcessCluster {
    async fn fetch_block(
        &self,
        peer: &PeerHost,
        request: FetchRequest,
    ) -> Result<FetchResponse, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let is_down = self.down.lock().unwrap().contains(&peer.id);
        let is_stalled = self.stalled.lock().unwrap().contains(&peer.id);
        if is_stalled {
            std::future::pending::<()>().await;
        }
        if is_down {
            return Err(FetchError::Unreachable(format!("{} is down", peer.address)));
        }
        match self.nodes.get(&peer.id) {
            Some(store) => serve_fetch(store.as_ref(), &request),
            None => Err(FetchError::Unreachable(format!("{} unknown", peer.address))),
        }
    }
}
