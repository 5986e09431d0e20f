//! Coordinator configuration.

use crate::error::{BootstrapError, Result};
use crate::fetch::FetchConfig;
use crate::lifecycle::RetentionOptions;
use crate::model::NamespaceId;
use std::time::Duration;

/// Default upper bound on one unit, fetches and merge included.
pub const DEFAULT_UNIT_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Default number of units processed at once.
pub const DEFAULT_UNIT_CONCURRENCY: usize = 8;

/// What an interrupted unit does with the data it already has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownPolicy {
    /// Merge and persist what arrived, marked degraded.
    #[default]
    PersistDegraded,
    /// Write nothing; the unit stays unfulfilled.
    Abort,
}

/// Settings for a peers bootstrap run.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapConfig {
    /// Namespace being bootstrapped.
    pub namespace: NamespaceId,
    /// Retention policy of the namespace.
    pub retention: RetentionOptions,
    /// Peer fetch settings.
    pub fetch: FetchConfig,
    /// Upper bound on fetching for one unit.
    pub unit_deadline: Duration,
    /// Units processed concurrently.
    pub unit_concurrency: usize,
    /// Behaviour of units interrupted by shutdown.
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            namespace: NamespaceId::new("default"),
            retention: RetentionOptions::default(),
            fetch: FetchConfig::default(),
            unit_deadline: DEFAULT_UNIT_DEADLINE,
            unit_concurrency: DEFAULT_UNIT_CONCURRENCY,
            shutdown_policy: ShutdownPolicy::default(),
        }
    }
}

impl BootstrapConfig {
    /// Creates a default configuration for `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: NamespaceId::new(namespace),
            ..Self::default()
        }
    }

    /// Sets the retention options.
    pub fn with_retention(mut self, retention: RetentionOptions) -> Self {
        self.retention = retention;
        self
    }

    /// Sets the fetch settings.
    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    /// Sets the per-unit deadline.
    pub fn with_unit_deadline(mut self, deadline: Duration) -> Self {
        self.unit_deadline = deadline;
        self
    }

    /// Sets the number of concurrent units.
    pub fn with_unit_concurrency(mut self, concurrency: usize) -> Self {
        self.unit_concurrency = concurrency;
        self
    }

    /// Sets the shutdown policy.
    pub fn with_shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown_policy = policy;
        self
    }

    /// Checks every setting. Called before any unit is planned.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.as_str().is_empty() {
            return Err(BootstrapError::Config("namespace must be named".into()));
        }
        if self.unit_deadline.is_zero() {
            return Err(BootstrapError::Config("unit deadline must be non-zero".into()));
        }
        if self.unit_concurrency == 0 {
            return Err(BootstrapError::Config("unit concurrency must be non-zero".into()));
        }
        self.retention.validate()?;
        self.fetch.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BootstrapConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.unit_deadline, Duration::from_secs(300));
        assert_eq!(config.unit_concurrency, 8);
        assert_eq!(config.shutdown_policy, ShutdownPolicy::PersistDegraded);
    }

    #[test]
    fn test_invalid_settings_are_config_errors() {
        let zero = BootstrapConfig::default().with_unit_concurrency(0);
        assert!(matches!(zero.validate(), Err(BootstrapError::Config(_))));

        let retention = RetentionOptions::default().with_block_size(Duration::ZERO);
        let bad = BootstrapConfig::default().with_retention(retention);
        assert!(bad.validate().unwrap_err().is_fatal());
    }
}
