//! Interface to the peer fetch protocol.
//!
//! The wire encoding is owned by the transport; this crate only sees
//! [`FetchRequest`] / [`FetchResponse`] values through [`PeerClient`].

use crate::model::{Datapoint, NamespaceId, SeriesId, ShardId, Timestamp};
use crate::topology::PeerHost;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Generation of the block fetch protocol spoken to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// One request returns the whole block.
    V1,
    /// The block is streamed in pages linked by continuation tokens.
    #[default]
    V2,
}

/// Opaque continuation token issued by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageToken(pub Vec<u8>);

/// Request for one peer's view of a (shard, block).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Namespace being bootstrapped.
    pub namespace: NamespaceId,
    /// Shard.
    pub shard: ShardId,
    /// Block start.
    pub block_start: Timestamp,
    /// Block width.
    pub block_size: Duration,
    /// Protocol generation.
    pub version: ProtocolVersion,
    /// Continuation token; `None` for the first page. Ignored by V1.
    pub page_token: Option<PageToken>,
    /// Maximum series per page. Ignored by V1.
    pub page_size: usize,
}

/// Datapoints a peer reported for one series, as received.
///
/// Nothing is validated yet; the fetcher checks ordering and block bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSeries {
    /// Series identifier.
    pub id: SeriesId,
    /// Datapoints in the order the peer sent them.
    pub points: Vec<Datapoint>,
}

impl RawSeries {
    /// Creates a raw series.
    pub fn new(id: impl Into<SeriesId>, points: Vec<Datapoint>) -> Self {
        Self {
            id: id.into(),
            points,
        }
    }
}

/// A successful reply to a [`FetchRequest`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchResponse {
    /// Series in this reply.
    pub series: Vec<RawSeries>,
    /// Token for the next page, if the block continues (V2 only).
    pub next_page: Option<PageToken>,
}

impl FetchResponse {
    /// The definitive "peer holds nothing for this block" reply.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a final reply holding `series`.
    pub fn with_series(series: Vec<RawSeries>) -> Self {
        Self {
            series,
            next_page: None,
        }
    }
}

/// Failure of a single fetch request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The request did not complete before its deadline.
    #[error("request timed out")]
    Timeout,
    /// The connection dropped mid-request.
    #[error("connection reset: {0}")]
    ConnectionReset(String),
    /// The peer could not be reached.
    #[error("peer unreachable: {0}")]
    Unreachable(String),
    /// The peer refused the request; retrying will not help.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl FetchError {
    /// Returns true if the request may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionReset(_) | Self::Unreachable(_)
        )
    }
}

/// Client side of the peer fetch protocol.
///
/// Implementations own connection pooling and must be safe to call from
/// many bootstrap units at once.
pub trait PeerClient: Send + Sync + 'static {
    /// Fetches one page (V2) or the whole block (V1) from `peer`.
    ///
    /// A peer with no data for the block answers [`FetchResponse::empty`].
    fn fetch_block(
        &self,
        peer: &PeerHost,
        request: FetchRequest,
    ) -> impl Future<Output = Result<FetchResponse, FetchError>> + Send;
}
