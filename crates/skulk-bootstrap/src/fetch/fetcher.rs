//! Per-peer block fetch with retries, paging and cancellation.

use crate::fetch::limiter::FetchLimiter;
use crate::fetch::protocol::{
    FetchError, FetchRequest, FetchResponse, PageToken, PeerClient, ProtocolVersion, RawSeries,
};
use crate::fetch::FetchConfig;
use crate::model::{BlockWindow, Datapoint, NamespaceId, Series, SeriesId, ShardId};
use crate::reconcile::{BlockDataSource, SourceOrigin};
use crate::shutdown::ShutdownSignal;
use crate::topology::{Peer, PeerId, PeerSet};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome of fetching one peer's view of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchStatus {
    /// Every page was received.
    Success,
    /// Some pages were received before the peer failed.
    Partial,
    /// The peer could not be reached or refused the request.
    Unreachable,
    /// Every attempt timed out, or the unit deadline elapsed.
    Timeout,
    /// Shutdown interrupted the fetch.
    Cancelled,
}

impl FetchStatus {
    /// Returns true if the result carries data the reconciler should use.
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Success | Self::Partial)
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Unreachable => "unreachable",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One peer's contribution to a (shard, block) unit.
///
/// Immutable once built: the reconciler only reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerBlockResult {
    origin: SourceOrigin,
    peer: PeerId,
    rank: u32,
    shard: ShardId,
    block: BlockWindow,
    series: BTreeMap<SeriesId, Series>,
    status: FetchStatus,
    attempts: u32,
    malformed: usize,
}

impl PeerBlockResult {
    /// Creates a result from validated series.
    pub fn new(
        peer: &Peer,
        shard: ShardId,
        block: BlockWindow,
        series: impl IntoIterator<Item = Series>,
        status: FetchStatus,
    ) -> Self {
        Self {
            origin: SourceOrigin::Peer(peer.id().clone()),
            peer: peer.id().clone(),
            rank: peer.rank,
            shard,
            block,
            series: series
                .into_iter()
                .map(|series| (series.id().clone(), series))
                .collect(),
            status,
            attempts: 0,
            malformed: 0,
        }
    }

    /// Creates a result carrying no data.
    pub fn failed(peer: &Peer, shard: ShardId, block: BlockWindow, status: FetchStatus) -> Self {
        Self::new(peer, shard, block, Vec::new(), status)
    }

    fn with_counters(mut self, attempts: u32, malformed: usize) -> Self {
        self.attempts = attempts;
        self.malformed = malformed;
        self
    }

    /// Returns the peer identity.
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Returns the shard.
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// Returns the block.
    pub fn block(&self) -> &BlockWindow {
        &self.block
    }

    /// Returns the fetch status.
    pub fn status(&self) -> FetchStatus {
        self.status
    }

    /// Returns the number of requests sent, retries included.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the number of series dropped as malformed.
    pub fn malformed(&self) -> usize {
        self.malformed
    }

    /// Returns the total number of datapoints received.
    pub fn point_count(&self) -> usize {
        self.series.values().map(Series::len).sum()
    }
}

impl BlockDataSource for PeerBlockResult {
    fn origin(&self) -> &SourceOrigin {
        &self.origin
    }

    fn rank(&self) -> u32 {
        self.rank
    }

    fn block_series(&self) -> &BTreeMap<SeriesId, Series> {
        &self.series
    }
}

enum RequestFailure {
    Cancelled,
    DeadlineElapsed,
    Failed(FetchError),
}

/// Fetches peer views of blocks through a [`PeerClient`].
///
/// Cloning is cheap; clones share the client and the limiter.
pub struct BlockFetcher<C> {
    client: Arc<C>,
    limiter: Arc<FetchLimiter>,
    config: FetchConfig,
}

impl<C> Clone for BlockFetcher<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            limiter: Arc::clone(&self.limiter),
            config: self.config.clone(),
        }
    }
}

impl<C: PeerClient> BlockFetcher<C> {
    /// Creates a fetcher with its own limiter sized from `config`.
    pub fn new(client: Arc<C>, config: FetchConfig) -> Self {
        let limiter = Arc::new(FetchLimiter::new(
            config.max_outstanding_per_peer,
            config.max_outstanding_total,
        ));
        Self::with_limiter(client, limiter, config)
    }

    /// Creates a fetcher sharing an existing limiter.
    pub fn with_limiter(client: Arc<C>, limiter: Arc<FetchLimiter>, config: FetchConfig) -> Self {
        Self {
            client,
            limiter,
            config,
        }
    }

    /// Returns the fetch settings.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Returns the shared limiter.
    pub fn limiter(&self) -> &Arc<FetchLimiter> {
        &self.limiter
    }

    /// Fetches `peer`'s view of one block.
    ///
    /// Never fails: every error is folded into the returned status.
    pub async fn fetch(
        &self,
        peer: &Peer,
        namespace: &NamespaceId,
        shard: ShardId,
        block: BlockWindow,
        shutdown: &ShutdownSignal,
    ) -> PeerBlockResult {
        self.fetch_until(peer, namespace, shard, block, None, shutdown)
            .await
    }

    /// Like [`fetch`](Self::fetch), but gives up at `deadline`.
    ///
    /// Pages received before the deadline are kept and reported as
    /// [`FetchStatus::Partial`]; with no page received the result is
    /// [`FetchStatus::Timeout`].
    pub async fn fetch_until(
        &self,
        peer: &Peer,
        namespace: &NamespaceId,
        shard: ShardId,
        block: BlockWindow,
        deadline: Option<Instant>,
        shutdown: &ShutdownSignal,
    ) -> PeerBlockResult {
        let mut raw: BTreeMap<SeriesId, Vec<Datapoint>> = BTreeMap::new();
        let mut attempts = 0;
        let mut pages = 0usize;
        let mut token: Option<PageToken> = None;

        let status = loop {
            let request = FetchRequest {
                namespace: namespace.clone(),
                shard,
                block_start: block.start_ts,
                block_size: block.size,
                version: self.config.protocol_version,
                page_token: token.take(),
                page_size: self.config.page_size,
            };

            match self
                .request_with_retry(peer, request, deadline, shutdown, &mut attempts)
                .await
            {
                Ok(FetchResponse { series, next_page }) => {
                    pages += 1;
                    for RawSeries { id, points } in series {
                        raw.entry(id).or_default().extend(points);
                    }
                    match (self.config.protocol_version, next_page) {
                        (ProtocolVersion::V2, Some(next)) => token = Some(next),
                        _ => break FetchStatus::Success,
                    }
                }
                Err(RequestFailure::Cancelled) => {
                    debug!(peer = %peer.id(), shard, block_start = block.start_ts, "fetch cancelled");
                    return PeerBlockResult::failed(peer, shard, block, FetchStatus::Cancelled)
                        .with_counters(attempts, 0);
                }
                Err(RequestFailure::DeadlineElapsed) => {
                    warn!(
                        peer = %peer.id(),
                        shard,
                        block_start = block.start_ts,
                        pages,
                        attempts,
                        "unit deadline reached before the peer finished"
                    );
                    break if pages == 0 {
                        FetchStatus::Timeout
                    } else {
                        FetchStatus::Partial
                    };
                }
                Err(RequestFailure::Failed(err)) => {
                    let status = match (pages, &err) {
                        (0, FetchError::Timeout) => FetchStatus::Timeout,
                        (0, _) => FetchStatus::Unreachable,
                        _ => FetchStatus::Partial,
                    };
                    warn!(
                        peer = %peer.id(),
                        shard,
                        block_start = block.start_ts,
                        pages,
                        attempts,
                        error = %err,
                        "peer fetch failed"
                    );
                    break status;
                }
            }
        };

        let (series, malformed) = validate(peer.id(), shard, &block, raw);
        debug!(
            peer = %peer.id(),
            shard,
            block_start = block.start_ts,
            %status,
            series = series.len(),
            malformed,
            "peer fetch finished"
        );
        PeerBlockResult::new(peer, shard, block, series, status).with_counters(attempts, malformed)
    }

    /// Fetches every peer in `peers` concurrently, stopping at `deadline`.
    ///
    /// Returns one result per peer in rank order. Each fetch stops on its own
    /// at the deadline, so pages already received are kept as
    /// [`FetchStatus::Partial`] and peers that sent nothing are reported as
    /// [`FetchStatus::Timeout`].
    pub async fn fetch_all(
        &self,
        peers: &PeerSet,
        namespace: &NamespaceId,
        block: BlockWindow,
        deadline: Instant,
        shutdown: &ShutdownSignal,
    ) -> Vec<PeerBlockResult> {
        let shard = peers.shard();
        let mut tasks = JoinSet::new();
        for peer in peers.iter() {
            let fetcher = self.clone();
            let peer = peer.clone();
            let namespace = namespace.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                fetcher
                    .fetch_until(&peer, &namespace, shard, block, Some(deadline), &shutdown)
                    .await
            });
        }

        let mut results: Vec<PeerBlockResult> = Vec::with_capacity(peers.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => {
                    warn!(shard, block_start = block.start_ts, error = %err, "fetch task failed")
                }
            }
        }

        for peer in peers.iter() {
            if !results.iter().any(|result| result.peer() == peer.id()) {
                results.push(PeerBlockResult::failed(
                    peer,
                    shard,
                    block,
                    FetchStatus::Unreachable,
                ));
            }
        }
        results.sort_by(|a, b| (a.rank, &a.peer).cmp(&(b.rank, &b.peer)));
        results
    }

    async fn request_with_retry(
        &self,
        peer: &Peer,
        request: FetchRequest,
        deadline: Option<Instant>,
        shutdown: &ShutdownSignal,
        attempts: &mut u32,
    ) -> Result<FetchResponse, RequestFailure> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            *attempts += 1;
            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(RequestFailure::Cancelled),
                _ = reached(deadline) => return Err(RequestFailure::DeadlineElapsed),
                outcome = self.attempt(peer, request.clone()) => outcome,
            };

            match outcome {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() && retry.should_retry(attempt) => {
                    let backoff = retry.backoff(attempt);
                    debug!(
                        peer = %peer.id(),
                        shard = request.shard,
                        block_start = request.block_start,
                        attempt,
                        ?backoff,
                        error = %err,
                        "retrying peer fetch"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return Err(RequestFailure::Cancelled),
                        _ = reached(deadline) => return Err(RequestFailure::DeadlineElapsed),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(err) => return Err(RequestFailure::Failed(err)),
            }
        }
    }

    async fn attempt(&self, peer: &Peer, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let _permit = self.limiter.acquire(peer.id()).await?;
        match tokio::time::timeout(
            self.config.request_timeout,
            self.client.fetch_block(&peer.host, request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        }
    }
}

/// Completes once `deadline` has passed; never completes without one.
async fn reached(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Turns raw peer data into series, dropping malformed ones.
fn validate(
    peer: &PeerId,
    shard: ShardId,
    block: &BlockWindow,
    raw: BTreeMap<SeriesId, Vec<Datapoint>>,
) -> (Vec<Series>, usize) {
    let mut series = Vec::with_capacity(raw.len());
    let mut malformed = 0;
    for (id, points) in raw {
        let checked = Series::from_sorted(id.clone(), points)
            .and_then(|candidate| candidate.check_within(block).map(|()| candidate));
        match checked {
            Ok(candidate) if candidate.is_empty() => {}
            Ok(candidate) => series.push(candidate),
            Err(violation) => {
                malformed += 1;
                warn!(
                    %peer,
                    shard,
                    block_start = block.start_ts,
                    series = %id,
                    %violation,
                    "dropping malformed series"
                );
            }
        }
    }
    (series, malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::RetryPolicy;
    use crate::topology::{PeerHost, PeerSetResolver, StaticTopology};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const HOUR: i64 = 3_600_000_000_000;

    fn block() -> BlockWindow {
        BlockWindow::new(2 * HOUR, Duration::from_secs(2 * 3600))
    }

    fn peer(id: &str, rank: u32) -> Peer {
        Peer {
            host: PeerHost::new(id, format!("{id}:9000")),
            rank,
        }
    }

    fn config() -> FetchConfig {
        FetchConfig::default()
            .with_request_timeout(Duration::from_secs(1))
            .with_retry(
                RetryPolicy::default()
                    .with_max_attempts(3)
                    .with_initial_backoff(Duration::from_millis(10))
                    .with_max_backoff(Duration::from_millis(40)),
            )
    }

    /// Replays a scripted sequence of replies; the last one repeats.
    struct ScriptedClient {
        replies: Mutex<Vec<std::result::Result<FetchResponse, FetchError>>>,
        calls: AtomicU32,
        delay: Option<Duration>,
        stall_when_drained: bool,
    }

    impl ScriptedClient {
        fn new(replies: Vec<std::result::Result<FetchResponse, FetchError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: AtomicU32::new(0),
                delay: None,
                stall_when_drained: false,
            }
        }

        /// Serves `replies` in order, then never answers again.
        fn stalling_after(replies: Vec<std::result::Result<FetchResponse, FetchError>>) -> Self {
            Self {
                stall_when_drained: true,
                ..Self::new(replies)
            }
        }

        fn hanging() -> Self {
            Self {
                delay: Some(Duration::from_secs(3600)),
                ..Self::new(vec![Ok(FetchResponse::empty())])
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl PeerClient for ScriptedClient {
        async fn fetch_block(
            &self,
            _peer: &PeerHost,
            _request: FetchRequest,
        ) -> std::result::Result<FetchResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = {
                let mut replies = self.replies.lock().unwrap();
                if replies.len() > 1 || (self.stall_when_drained && !replies.is_empty()) {
                    Some(replies.remove(0))
                } else if self.stall_when_drained {
                    None
                } else {
                    Some(replies[0].clone())
                }
            };
            match next {
                Some(reply) => reply,
                None => std::future::pending().await,
            }
        }
    }

    fn points(range: std::ops::Range<i64>) -> Vec<Datapoint> {
        range
            .map(|i| Datapoint::new(2 * HOUR + i, i as f64))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let client = Arc::new(ScriptedClient::new(vec![
            Err(FetchError::ConnectionReset("eof".into())),
            Err(FetchError::Timeout),
            Ok(FetchResponse::with_series(vec![RawSeries::new("a", points(0..3))])),
        ]));
        let fetcher = BlockFetcher::new(Arc::clone(&client), config());

        let result = fetcher
            .fetch(&peer("p", 0), &NamespaceId::new("ns"), 1, block(), &ShutdownSignal::never())
            .await;
        assert_eq!(result.status(), FetchStatus::Success);
        assert_eq!(result.attempts(), 3);
        assert_eq!(result.point_count(), 3);
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_reports_unreachable() {
        let client = Arc::new(ScriptedClient::new(vec![Err(FetchError::Unreachable(
            "refused".into(),
        ))]));
        let fetcher = BlockFetcher::new(Arc::clone(&client), config());

        let result = fetcher
            .fetch(&peer("p", 0), &NamespaceId::new("ns"), 1, block(), &ShutdownSignal::never())
            .await;
        assert_eq!(result.status(), FetchStatus::Unreachable);
        assert_eq!(client.calls(), 3);
        assert!(result.block_series().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_reports_timeout() {
        let client = Arc::new(ScriptedClient::hanging());
        let fetcher = BlockFetcher::new(Arc::clone(&client), config());

        let result = fetcher
            .fetch(&peer("p", 0), &NamespaceId::new("ns"), 1, block(), &ShutdownSignal::never())
            .await;
        assert_eq!(result.status(), FetchStatus::Timeout);
        assert_eq!(result.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_is_not_retried() {
        let client = Arc::new(ScriptedClient::new(vec![Err(FetchError::Rejected(
            "not a replica".into(),
        ))]));
        let fetcher = BlockFetcher::new(Arc::clone(&client), config());

        let result = fetcher
            .fetch(&peer("p", 0), &NamespaceId::new("ns"), 1, block(), &ShutdownSignal::never())
            .await;
        assert_eq!(result.status(), FetchStatus::Unreachable);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_response_is_success_without_retry() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(FetchResponse::empty())]));
        let fetcher = BlockFetcher::new(Arc::clone(&client), config());

        let result = fetcher
            .fetch(&peer("p", 0), &NamespaceId::new("ns"), 1, block(), &ShutdownSignal::never())
            .await;
        assert_eq!(result.status(), FetchStatus::Success);
        assert_eq!(client.calls(), 1);
        assert!(result.block_series().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_v2_failed_page_keeps_earlier_pages() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(FetchResponse {
                series: vec![RawSeries::new("a", points(0..2))],
                next_page: Some(PageToken(vec![1])),
            }),
            Ok(FetchResponse {
                series: vec![RawSeries::new("a", points(2..4))],
                next_page: Some(PageToken(vec![2])),
            }),
            Err(FetchError::Rejected("page expired".into())),
        ]));
        let fetcher = BlockFetcher::new(Arc::clone(&client), config());

        let result = fetcher
            .fetch(&peer("p", 0), &NamespaceId::new("ns"), 1, block(), &ShutdownSignal::never())
            .await;
        assert_eq!(result.status(), FetchStatus::Partial);
        assert_eq!(result.series(&SeriesId::new("a")).unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_v1_ignores_continuation_token() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(FetchResponse {
            series: vec![RawSeries::new("a", points(0..2))],
            next_page: Some(PageToken(vec![1])),
        })]));
        let fetcher = BlockFetcher::new(
            Arc::clone(&client),
            config().with_protocol_version(ProtocolVersion::V1),
        );

        let result = fetcher
            .fetch(&peer("p", 0), &NamespaceId::new("ns"), 1, block(), &ShutdownSignal::never())
            .await;
        assert_eq!(result.status(), FetchStatus::Success);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_series_dropped() {
        let mut unsorted = points(0..3);
        unsorted.swap(0, 2);
        let outside = vec![Datapoint::new(10 * HOUR, 1.0)];
        let client = Arc::new(ScriptedClient::new(vec![Ok(FetchResponse::with_series(
            vec![
                RawSeries::new("good", points(0..3)),
                RawSeries::new("unsorted", unsorted),
                RawSeries::new("outside", outside),
                RawSeries::new("dup", vec![Datapoint::new(2 * HOUR, 1.0); 2]),
            ],
        ))]));
        let fetcher = BlockFetcher::new(client, config());

        let result = fetcher
            .fetch(&peer("p", 0), &NamespaceId::new("ns"), 1, block(), &ShutdownSignal::never())
            .await;
        assert_eq!(result.status(), FetchStatus::Success);
        assert_eq!(result.malformed(), 3);
        assert_eq!(result.block_series().len(), 1);
        assert!(result.series(&SeriesId::new("good")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_inflight_fetch() {
        let client = Arc::new(ScriptedClient::hanging());
        let fetcher = BlockFetcher::new(
            client,
            config().with_request_timeout(Duration::from_secs(7200)),
        );
        let (trigger, signal) = crate::shutdown::shutdown_channel();

        let task = tokio::spawn(async move {
            fetcher
                .fetch(&peer("p", 0), &NamespaceId::new("ns"), 1, block(), &signal)
                .await
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        trigger.shutdown();

        let result = task.await.unwrap();
        assert_eq!(result.status(), FetchStatus::Cancelled);
        assert!(result.block_series().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_all_marks_outstanding_peers_at_deadline() {
        let topology = StaticTopology::new()
            .with_replica(1, PeerHost::new("a", "a:9000"))
            .with_replica(1, PeerHost::new("b", "b:9000"));
        let peers = PeerSetResolver::new(PeerId::new("local"), topology).resolve(1);
        let fetcher = BlockFetcher::new(
            Arc::new(ScriptedClient::hanging()),
            config().with_request_timeout(Duration::from_secs(7200)),
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        let results = fetcher
            .fetch_all(&peers, &NamespaceId::new("ns"), block(), deadline, &ShutdownSignal::never())
            .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.status() == FetchStatus::Timeout));
        assert_eq!(results[0].peer(), &PeerId::new("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_keeps_pages_received_before_stall() {
        let client = Arc::new(ScriptedClient::stalling_after(vec![Ok(FetchResponse {
            series: vec![RawSeries::new("a", points(0..3))],
            next_page: Some(PageToken(vec![1])),
        })]));
        let fetcher = BlockFetcher::new(
            Arc::clone(&client),
            config().with_request_timeout(Duration::from_secs(7200)),
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        let result = fetcher
            .fetch_until(
                &peer("p", 0),
                &NamespaceId::new("ns"),
                1,
                block(),
                Some(deadline),
                &ShutdownSignal::never(),
            )
            .await;
        assert_eq!(result.status(), FetchStatus::Partial);
        assert_eq!(result.series(&SeriesId::new("a")).unwrap().len(), 3);
        assert_eq!(client.calls(), 2);
        assert!(Instant::now() >= deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_all_keeps_partial_pages_at_deadline() {
        let topology = StaticTopology::new().with_replica(1, PeerHost::new("a", "a:9000"));
        let peers = PeerSetResolver::new(PeerId::new("local"), topology).resolve(1);
        let fetcher = BlockFetcher::new(
            Arc::new(ScriptedClient::stalling_after(vec![Ok(FetchResponse {
                series: vec![RawSeries::new("a", points(0..2))],
                next_page: Some(PageToken(vec![1])),
            })])),
            config().with_request_timeout(Duration::from_secs(7200)),
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        let results = fetcher
            .fetch_all(&peers, &NamespaceId::new("ns"), block(), deadline, &ShutdownSignal::never())
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status(), FetchStatus::Partial);
        assert_eq!(results[0].point_count(), 2);
    }
}
