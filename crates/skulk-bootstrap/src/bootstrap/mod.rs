//! Peers bootstrap coordination.
//!
//! [`PeersBootstrapper`] plans the blocks each shard still needs, resolves
//! the replicas of the shard, fetches every peer's view under a per-unit
//! deadline, reconciles the views and hands the result to the sink.

pub mod config;
pub mod coordinator;
pub mod report;

pub use config::{BootstrapConfig, ShutdownPolicy, DEFAULT_UNIT_CONCURRENCY, DEFAULT_UNIT_DEADLINE};
pub use coordinator::{PeersBootstrapper, ShardTarget};
pub use report::{BootstrapReport, UnitOutcome, UnitReport};
