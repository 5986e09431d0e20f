//! Peer set resolution from cluster topology.
//!
//! The membership collaborator supplies replicas per shard through the
//! [`Topology`] trait. [`PeerSetResolver`] turns that into a [`PeerSet`]: the
//! local node removed, duplicates collapsed, and a dense priority rank
//! assigned. Rank is only a tie-break for conflicting values; correctness of
//! the merge never depends on it.

use crate::model::ShardId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Identity of a node in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    /// Creates a peer identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A replica of a shard as reported by the membership collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerHost {
    /// Node identity.
    pub id: PeerId,
    /// Connection address, opaque to this crate.
    pub address: String,
    /// Configured preference; lower is preferred.
    pub priority: u32,
}

impl PeerHost {
    /// Creates a host with default priority.
    pub fn new(id: impl Into<PeerId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            priority: 0,
        }
    }

    /// Sets the configured priority.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

/// Read access to resolved cluster topology.
pub trait Topology: Send + Sync {
    /// Returns every node replicating `shard`, the local node included.
    fn replicas(&self, shard: ShardId) -> Vec<PeerHost>;
}

impl<T: Topology + ?Sized> Topology for Arc<T> {
    fn replicas(&self, shard: ShardId) -> Vec<PeerHost> {
        (**self).replicas(shard)
    }
}

/// Fixed shard-to-replica assignment.
#[derive(Debug, Clone, Default)]
pub struct StaticTopology {
    shards: HashMap<ShardId, Vec<PeerHost>>,
}

impl StaticTopology {
    /// Creates an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `host` as a replica of `shard`.
    pub fn with_replica(mut self, shard: ShardId, host: PeerHost) -> Self {
        self.add_replica(shard, host);
        self
    }

    /// Adds `host` as a replica of `shard`.
    pub fn add_replica(&mut self, shard: ShardId, host: PeerHost) {
        self.shards.entry(shard).or_default().push(host);
    }

    /// Adds `hosts` as replicas of every shard in `shards`.
    pub fn with_replica_set(
        mut self,
        shards: impl IntoIterator<Item = ShardId>,
        hosts: &[PeerHost],
    ) -> Self {
        for shard in shards {
            for host in hosts {
                self.add_replica(shard, host.clone());
            }
        }
        self
    }
}

impl Topology for StaticTopology {
    fn replicas(&self, shard: ShardId) -> Vec<PeerHost> {
        self.shards.get(&shard).cloned().unwrap_or_default()
    }
}

/// A peer selected for bootstrap, with its rank in the peer set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// The replica.
    pub host: PeerHost,
    /// Dense rank; 0 is the highest priority.
    pub rank: u32,
}

impl Peer {
    /// Returns the peer identity.
    pub fn id(&self) -> &PeerId {
        &self.host.id
    }
}

/// Ordered peers that can contribute data for one shard.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PeerSet {
    shard: ShardId,
    peers: Vec<Peer>,
}

impl PeerSet {
    /// Returns the shard.
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// Iterates over peers from highest to lowest priority.
    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.iter()
    }

    /// Returns the number of peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns true if no peer replicates the shard.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Returns the peer with the given identity.
    pub fn get(&self, id: &PeerId) -> Option<&Peer> {
        self.peers.iter().find(|peer| peer.id() == id)
    }
}

/// Resolves the peers to bootstrap a shard from.
#[derive(Debug, Clone)]
pub struct PeerSetResolver<T> {
    local: PeerId,
    topology: T,
}

impl<T: Topology> PeerSetResolver<T> {
    /// Creates a resolver for the node identified by `local`.
    pub fn new(local: PeerId, topology: T) -> Self {
        Self { local, topology }
    }

    /// Returns the local node identity.
    pub fn local(&self) -> &PeerId {
        &self.local
    }

    /// Returns the peers replicating `shard`, excluding the local node.
    ///
    /// Peers are ordered by configured priority, then identity. A host
    /// listed more than once keeps its most preferred entry.
    pub fn resolve(&self, shard: ShardId) -> PeerSet {
        let mut hosts: Vec<PeerHost> = self
            .topology
            .replicas(shard)
            .into_iter()
            .filter(|host| host.id != self.local)
            .collect();
        hosts.sort_by(|a, b| (&a.id, a.priority).cmp(&(&b.id, b.priority)));
        hosts.dedup_by(|later, earlier| later.id == earlier.id);
        hosts.sort_by(|a, b| (a.priority, &a.id).cmp(&(b.priority, &b.id)));

        let peers = hosts
            .into_iter()
            .enumerate()
            .map(|(rank, host)| Peer {
                host,
                rank: rank as u32,
            })
            .collect();
        PeerSet { shard, peers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> StaticTopology {
        StaticTopology::new()
            .with_replica(1, PeerHost::new("node-c", "10.0.0.3:9000"))
            .with_replica(1, PeerHost::new("node-b", "10.0.0.2:9000").with_priority(1))
            .with_replica(1, PeerHost::new("node-a", "10.0.0.1:9000").with_priority(1))
            .with_replica(1, PeerHost::new("node-local", "127.0.0.1:9000"))
    }

    #[test]
    fn test_resolve_excludes_local_and_orders() {
        let resolver = PeerSetResolver::new(PeerId::new("node-local"), topology());
        let peers = resolver.resolve(1);

        let ids: Vec<_> = peers.iter().map(|p| p.id().as_str().to_string()).collect();
        assert_eq!(ids, vec!["node-c", "node-a", "node-b"]);
        let ranks: Vec<_> = peers.iter().map(|p| p.rank).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
        assert!(peers.get(&PeerId::new("node-local")).is_none());
    }

    #[test]
    fn test_resolve_deduplicates_keeping_preferred_entry() {
        let topology = topology().with_replica(1, PeerHost::new("node-b", "alt").with_priority(0));
        let resolver = PeerSetResolver::new(PeerId::new("node-local"), topology);
        let peers = resolver.resolve(1);

        assert_eq!(peers.len(), 3);
        let b = peers.get(&PeerId::new("node-b")).unwrap();
        assert_eq!(b.host.address, "alt");
        assert_eq!(b.rank, 0);
    }

    #[test]
    fn test_unknown_shard_is_empty() {
        let resolver = PeerSetResolver::new(PeerId::new("node-local"), topology());
        let peers = resolver.resolve(42);
        assert!(peers.is_empty());
        assert_eq!(peers.shard(), 42);
    }

    #[test]
    fn test_resolution_is_stable() {
        let resolver = PeerSetResolver::new(PeerId::new("node-local"), Arc::new(topology()));
        assert_eq!(resolver.resolve(1), resolver.resolve(1));
    }
}
