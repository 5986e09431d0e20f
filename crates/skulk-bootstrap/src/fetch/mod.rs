//! Bounded, retrying retrieval of peer block data.
//!
//! A [`BlockFetcher`] turns one (peer, shard, block) into a
//! [`PeerBlockResult`]. Requests go through a shared [`FetchLimiter`], are
//! bounded by a per-request timeout and are retried on transient failure
//! according to a [`RetryPolicy`]. Fetch failures never escape as errors.

pub mod fetcher;
pub mod limiter;
pub mod protocol;
pub mod retry;
pub mod server;

pub use fetcher::{BlockFetcher, FetchStatus, PeerBlockResult};
pub use limiter::{FetchLimiter, FetchPermit};
pub use protocol::{
    FetchError, FetchRequest, FetchResponse, PageToken, PeerClient, ProtocolVersion, RawSeries,
};
pub use retry::RetryPolicy;
pub use server::serve_fetch;

use crate::error::{BootstrapError, Result};
use std::time::Duration;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default limit on outstanding requests to one peer.
pub const DEFAULT_MAX_OUTSTANDING_PER_PEER: usize = 4;
/// Default limit on outstanding requests across all peers.
pub const DEFAULT_MAX_OUTSTANDING_TOTAL: usize = 64;
/// Default number of series per V2 page.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Settings for peer fetches.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    /// Upper bound for one request, including the peer's response time.
    pub request_timeout: Duration,
    /// Outstanding requests allowed to a single peer.
    pub max_outstanding_per_peer: usize,
    /// Outstanding requests allowed across all peers.
    pub max_outstanding_total: usize,
    /// Retry behaviour for transient failures.
    pub retry: RetryPolicy,
    /// Protocol generation used for requests.
    pub protocol_version: ProtocolVersion,
    /// Series per page for [`ProtocolVersion::V2`].
    pub page_size: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_outstanding_per_peer: DEFAULT_MAX_OUTSTANDING_PER_PEER,
            max_outstanding_total: DEFAULT_MAX_OUTSTANDING_TOTAL,
            retry: RetryPolicy::default(),
            protocol_version: ProtocolVersion::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl FetchConfig {
    /// Sets the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the per-peer and aggregate request limits.
    pub fn with_limits(mut self, per_peer: usize, total: usize) -> Self {
        self.max_outstanding_per_peer = per_peer;
        self.max_outstanding_total = total;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the protocol generation.
    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    /// Sets the V2 page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Checks that the settings are usable.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(BootstrapError::Config("request timeout must be non-zero".into()));
        }
        if self.max_outstanding_per_peer == 0 || self.max_outstanding_total == 0 {
            return Err(BootstrapError::Config(
                "outstanding request limits must be non-zero".into(),
            ));
        }
        if self.page_size == 0 {
            return Err(BootstrapError::Config("page size must be non-zero".into()));
        }
        self.retry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = FetchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.protocol_version, ProtocolVersion::V2);
    }

    #[test]
    fn test_zero_limits_rejected() {
        assert!(FetchConfig::default().with_limits(0, 8).validate().is_err());
        assert!(FetchConfig::default().with_page_size(0).validate().is_err());
        assert!(FetchConfig::default()
            .with_request_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }
}
