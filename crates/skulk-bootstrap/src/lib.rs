//! Skulk Peers Bootstrap - replica reconciliation for the Alopex Skulk time series engine
//!
//! When a node starts, or must fill a historical range for the shards it
//! owns, no single replica is guaranteed to hold a complete copy of a block:
//! writes fan out without quorum confirmation. This crate determines which
//! blocks still need data, fetches every replica's view, merges the views
//! into one complete series set and persists it locally.
//!
//! # Components
//!
//! - [`RetentionWindow`]: block starts that exist "now", sealed or mutable
//! - [`BootstrapRangePlanner`]: blocks of a shard still requiring peers
//! - [`PeerSetResolver`]: replicas of a shard, ranked by priority
//! - [`BlockFetcher`]: bounded, retrying fetch of one peer's block view
//! - [`reconcile()`]: deterministic union of all views with conflict tracking
//! - [`BootstrapSink`]: durable persistence, then the bootstrapped mark
//! - [`PeersBootstrapper`]: drives all of the above for every unit
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_skulk_bootstrap::{
//!     shutdown_channel, BootstrapConfig, FileStore, PeerId, PeersBootstrapper, ShardTarget,
//! };
//! use std::sync::Arc;
//!
//! let config = BootstrapConfig::new("metrics");
//! let store = Arc::new(FileStore::open("/var/lib/skulk")?);
//! let bootstrapper =
//!     PeersBootstrapper::new(config, PeerId::new("node-c"), topology, client, store)?;
//!
//! let (_trigger, shutdown) = shutdown_channel();
//! let report = bootstrapper
//!     .bootstrap([0, 1, 2].map(ShardTarget::new), &shutdown)
//!     .await?;
//! assert!(report.is_complete());
//! ```

#![deny(missing_docs)]

pub mod bootstrap;
pub mod error;
pub mod fetch;
pub mod lifecycle;
pub mod model;
pub mod reconcile;
pub mod shutdown;
pub mod sink;
pub mod topology;

pub use bootstrap::{
    BootstrapConfig, BootstrapReport, PeersBootstrapper, ShardTarget, ShutdownPolicy, UnitOutcome,
    UnitReport,
};
pub use error::{BootstrapError, Result};
pub use fetch::{
    BlockFetcher, FetchConfig, FetchError, FetchLimiter, FetchRequest, FetchResponse, FetchStatus,
    PeerBlockResult, PeerClient, ProtocolVersion, RawSeries, RetryPolicy,
};
pub use lifecycle::{
    BlockState, BlockStatus, BootstrapRangePlanner, BootstrapUnit, PriorStageResult,
    RetentionOptions, RetentionWindow, ShardBootstrapStatus, ShardPlan,
};
pub use model::{BlockWindow, Datapoint, NamespaceId, Series, SeriesId, ShardId, Timestamp};
pub use reconcile::{
    reconcile, BlockDataSource, Conflict, LocalPartial, ReconciledBlock, SourceOrigin,
};
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
pub use sink::{BlockStore, BootstrapSink, FileStore, MemoryStore, StoredBlock};
pub use topology::{Peer, PeerHost, PeerId, PeerSet, PeerSetResolver, StaticTopology, Topology};
