//! Drives planning, fetch, merge and persistence for every unit of a run.

use crate::bootstrap::config::{BootstrapConfig, ShutdownPolicy};
use crate::bootstrap::report::{BootstrapReport, UnitOutcome, UnitReport};
use crate::error::{BootstrapError, Result};
use crate::fetch::{BlockFetcher, FetchLimiter, FetchStatus, PeerClient};
use crate::lifecycle::retention::current_timestamp_nanos;
use crate::lifecycle::{
    BlockStatus, BootstrapRangePlanner, BootstrapUnit, PriorStageResult, ShardBootstrapStatus,
};
use crate::model::{ShardId, Timestamp};
use crate::reconcile::{reconcile, BlockDataSource, LocalPartial, SourceOrigin};
use crate::shutdown::ShutdownSignal;
use crate::sink::{BlockStore, BootstrapSink};
use crate::topology::{PeerId, PeerSetResolver, Topology};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// A shard to bootstrap, with whatever an earlier stage produced for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardTarget {
    /// Shard.
    pub shard: ShardId,
    /// Output of the filesystem or commit log stage, if any.
    pub prior: Option<PriorStageResult>,
}

impl ShardTarget {
    /// Creates a target with no prior stage output.
    pub fn new(shard: ShardId) -> Self {
        Self { shard, prior: None }
    }

    /// Attaches prior stage output.
    pub fn with_prior(mut self, prior: PriorStageResult) -> Self {
        self.prior = Some(prior);
        self
    }
}

impl From<ShardId> for ShardTarget {
    fn from(shard: ShardId) -> Self {
        Self::new(shard)
    }
}

struct Inner<C, T, S> {
    config: BootstrapConfig,
    resolver: PeerSetResolver<T>,
    fetcher: BlockFetcher<C>,
    sink: BootstrapSink<S>,
}

/// Bootstraps the shards owned by the local node from their peers.
///
/// Units are independent: each is fetched, merged and persisted by one task,
/// and a failure in one never stops the others.
pub struct PeersBootstrapper<C, T, S> {
    inner: Arc<Inner<C, T, S>>,
}

impl<C, T, S> Clone for PeersBootstrapper<C, T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, T, S> PeersBootstrapper<C, T, S>
where
    C: PeerClient,
    T: Topology + 'static,
    S: BlockStore,
{
    /// Creates a bootstrapper for the node identified by `local`.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Config`] if `config` is inconsistent.
    pub fn new(
        config: BootstrapConfig,
        local: PeerId,
        topology: T,
        client: Arc<C>,
        store: Arc<S>,
    ) -> Result<Self> {
        config.validate()?;
        let fetcher = BlockFetcher::new(client, config.fetch.clone());
        let sink = BootstrapSink::new(store, config.namespace.clone());
        Ok(Self {
            inner: Arc::new(Inner {
                resolver: PeerSetResolver::new(local, topology),
                fetcher,
                sink,
                config,
            }),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BootstrapConfig {
        &self.inner.config
    }

    /// Returns the limiter shared by every fetch of this bootstrapper.
    pub fn limiter(&self) -> &Arc<FetchLimiter> {
        self.inner.fetcher.limiter()
    }

    /// Bootstraps `targets` against the retention window at the current time.
    pub async fn bootstrap(
        &self,
        targets: impl IntoIterator<Item = ShardTarget>,
        shutdown: &ShutdownSignal,
    ) -> Result<BootstrapReport> {
        let now = current_timestamp_nanos()?;
        self.bootstrap_at(now, targets, shutdown).await
    }

    /// Bootstraps `targets` against the retention window at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Config`] before any fetch if the retention
    /// window cannot be computed, and [`BootstrapError::PersistenceFailed`]
    /// if every unit that tried to persist failed. All other failures are
    /// reported per unit.
    pub async fn bootstrap_at(
        &self,
        now: Timestamp,
        targets: impl IntoIterator<Item = ShardTarget>,
        shutdown: &ShutdownSignal,
    ) -> Result<BootstrapReport> {
        let config = &self.inner.config;
        let planner = BootstrapRangePlanner::at(config.retention.clone(), now)?;

        let mut statuses: BTreeMap<ShardId, ShardBootstrapStatus> = BTreeMap::new();
        let mut units: Vec<BootstrapUnit> = Vec::new();
        let mut skipped = 0;
        for target in targets {
            let mut status = self.load_status(target.shard).await;
            let plan = planner.plan(target.shard, &status, target.prior.as_ref());
            skipped += plan.skipped.len();
            if let Some(prior) = &target.prior {
                status.merge(&prior.status());
            }
            statuses.insert(target.shard, status);
            units.extend(plan.units);
        }

        info!(
            namespace = %config.namespace,
            shards = statuses.len(),
            units = units.len(),
            skipped,
            "starting peers bootstrap"
        );

        let permits = Arc::new(Semaphore::new(config.unit_concurrency));
        let mut tasks = JoinSet::new();
        for unit in units {
            let inner = Arc::clone(&self.inner);
            let permits = Arc::clone(&permits);
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => None,
                    permit = permits.acquire_owned() => permit.ok(),
                };
                match permit {
                    Some(_permit) => inner.run_unit(unit, &shutdown).await,
                    None => {
                        debug!(
                            shard = unit.shard,
                            block_start = unit.block.start_ts,
                            "skipping unit after shutdown"
                        );
                        UnitReport::new(unit.shard, unit.block.start_ts, unit.state, unit.previous)
                    }
                }
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(err) => error!(error = %err, "bootstrap unit task failed"),
            }
        }

        for report in &reports {
            if report.outcome == UnitOutcome::Persisted {
                statuses
                    .entry(report.shard)
                    .or_insert_with(|| ShardBootstrapStatus::new(report.shard))
                    .set(report.block_start, report.status);
            }
        }

        let report = BootstrapReport::new(reports, statuses, skipped);
        let attempted = report
            .units()
            .iter()
            .filter(|unit| unit.attempted_persist())
            .count();
        let failed = report.persist_failures();
        info!(
            namespace = %config.namespace,
            fulfilled = report.count(BlockStatus::Fulfilled),
            degraded = report.count(BlockStatus::Degraded),
            failed,
            conflicts = report.total_conflicts(),
            "peers bootstrap finished"
        );
        if attempted > 0 && failed == attempted {
            error!(failed, "every bootstrap unit failed to persist");
            return Err(BootstrapError::PersistenceFailed { failed });
        }
        Ok(report)
    }

    async fn load_status(&self, shard: ShardId) -> ShardBootstrapStatus {
        let store = Arc::clone(self.inner.sink.store());
        let namespace = self.inner.config.namespace.clone();
        match tokio::task::spawn_blocking(move || store.load_status(&namespace, shard)).await {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => {
                warn!(shard, error = %err, "failed to load bootstrap status, starting empty");
                ShardBootstrapStatus::new(shard)
            }
            Err(err) => {
                warn!(shard, error = %err, "status load task failed, starting empty");
                ShardBootstrapStatus::new(shard)
            }
        }
    }
}

impl<C, T, S> Inner<C, T, S>
where
    C: PeerClient,
    T: Topology + 'static,
    S: BlockStore,
{
    async fn run_unit(&self, unit: BootstrapUnit, shutdown: &ShutdownSignal) -> UnitReport {
        let started = Instant::now();
        let shard = unit.shard;
        let block_start = unit.block.start_ts;
        let mut report = UnitReport::new(shard, block_start, unit.state, unit.previous);

        let peers = self.resolver.resolve(shard);
        let deadline = started + self.config.unit_deadline;
        let results = self
            .fetcher
            .fetch_all(&peers, &self.config.namespace, unit.block, deadline, shutdown)
            .await;

        report.peers = results
            .iter()
            .map(|result| (result.peer().clone(), result.status()))
            .collect();
        report.peers_succeeded = results
            .iter()
            .filter(|result| result.status() == FetchStatus::Success)
            .count();
        report.malformed = results.iter().map(|result| result.malformed()).sum();

        let interrupted = shutdown.is_shutdown()
            || results
                .iter()
                .any(|result| result.status() == FetchStatus::Cancelled);
        if interrupted && self.config.shutdown_policy == ShutdownPolicy::Abort {
            warn!(shard, block_start, "unit interrupted by shutdown, discarding");
            report.outcome = UnitOutcome::Aborted;
            report.elapsed = started.elapsed();
            return report;
        }

        let stored = self.read_stored(&unit).await;
        let reconciled = {
            let mut sources: Vec<&dyn BlockDataSource> = results
                .iter()
                .filter(|result| result.status().is_usable())
                .map(|result| result as &dyn BlockDataSource)
                .collect();
            if let Some(local) = &unit.local {
                sources.push(local);
                report.used_local = true;
            }
            if let Some(stored) = &stored {
                sources.push(stored);
                report.used_stored = true;
            }
            reconcile(shard, unit.block, &sources)
        };

        report.conflicts = reconciled.conflicts().len();
        report.series = reconciled.series().len();
        report.points = reconciled.stats().points;
        report.peers_conflicted = reconciled
            .conflicted_sources()
            .iter()
            .filter(|origin| matches!(origin, SourceOrigin::Peer(_)))
            .count();
        if report.conflicts > 0 {
            warn!(
                shard,
                block_start,
                conflicts = report.conflicts,
                peers_conflicted = report.peers_conflicted,
                "peers disagree on datapoint values"
            );
        }

        let complete = !interrupted
            && results
                .iter()
                .all(|result| result.status() == FetchStatus::Success);
        let target = if complete {
            BlockStatus::Fulfilled
        } else {
            BlockStatus::Degraded
        };

        let sink = self.sink.clone();
        match tokio::task::spawn_blocking(move || sink.persist(&reconciled, target)).await {
            Ok(Ok(status)) => {
                report.status = status;
                report.outcome = UnitOutcome::Persisted;
            }
            Ok(Err(err)) => report.outcome = UnitOutcome::PersistFailed(err.to_string()),
            Err(err) => report.outcome = UnitOutcome::PersistFailed(err.to_string()),
        }
        report.elapsed = started.elapsed();

        info!(
            shard,
            block_start,
            status = ?report.status,
            outcome = ?report.outcome,
            peers_contacted = report.peers_contacted(),
            peers_succeeded = report.peers_succeeded,
            peers_failed = report.peers_failed(),
            peers_conflicted = report.peers_conflicted,
            conflicts = report.conflicts,
            points = report.points,
            "bootstrap unit finished"
        );
        report
    }

    /// Reads what an earlier run persisted for the unit's block, if anything.
    async fn read_stored(&self, unit: &BootstrapUnit) -> Option<LocalPartial> {
        let store = Arc::clone(self.sink.store());
        let namespace = self.config.namespace.clone();
        let (shard, block) = (unit.shard, unit.block);
        let read = tokio::task::spawn_blocking(move || {
            store.read_block(&namespace, shard, block.start_ts)
        })
        .await;
        match read {
            Ok(Ok(Some(stored))) if stored.block == block => {
                debug!(
                    shard,
                    block_start = block.start_ts,
                    points = stored.point_count(),
                    "merging previously stored block"
                );
                Some(LocalPartial::stored(shard, block, stored.series.into_values()))
            }
            Ok(Ok(Some(stored))) => {
                warn!(
                    shard,
                    block_start = block.start_ts,
                    stored_size = ?stored.block.size,
                    "stored block has a different size, ignoring it"
                );
                None
            }
            Ok(Ok(None)) => None,
            Ok(Err(err)) => {
                warn!(shard, block_start = block.start_ts, error = %err, "failed to read stored block");
                None
            }
            Err(err) => {
                warn!(shard, block_start = block.start_ts, error = %err, "stored block read task failed");
                None
            }
        }
    }
}
