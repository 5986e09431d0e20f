//! Retention window model: which blocks exist "now" and which are sealed.

use crate::error::{BootstrapError, Result};
use crate::model::{align_block_start, duration_nanos, BlockWindow, Timestamp};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default retention period (2 days).
pub const DEFAULT_RETENTION_PERIOD: Duration = Duration::from_secs(2 * 24 * 60 * 60);

/// Default block size (2 hours).
pub const DEFAULT_BLOCK_SIZE: Duration = Duration::from_secs(2 * 60 * 60);

/// Default buffer past (10 minutes).
pub const DEFAULT_BUFFER_PAST: Duration = Duration::from_secs(10 * 60);

/// Default buffer future (2 minutes).
pub const DEFAULT_BUFFER_FUTURE: Duration = Duration::from_secs(2 * 60);

/// Retention settings of a single namespace.
///
/// # Examples
/// ```rust,ignore
/// use alopex_skulk_bootstrap::lifecycle::retention::RetentionOptions;
/// use std::time::Duration;
///
/// let options = RetentionOptions::default()
///     .with_retention_period(Duration::from_secs(6 * 3600))
///     .with_block_size(Duration::from_secs(2 * 3600));
/// options.validate()?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionOptions {
    /// How long data is kept.
    pub retention_period: Duration,
    /// Width of each block.
    pub block_size: Duration,
    /// How far into the past writes are still accepted.
    pub buffer_past: Duration,
    /// How far into the future writes are accepted.
    pub buffer_future: Duration,
}

impl Default for RetentionOptions {
    fn default() -> Self {
        Self {
            retention_period: DEFAULT_RETENTION_PERIOD,
            block_size: DEFAULT_BLOCK_SIZE,
            buffer_past: DEFAULT_BUFFER_PAST,
            buffer_future: DEFAULT_BUFFER_FUTURE,
        }
    }
}

impl RetentionOptions {
    /// Sets the retention period.
    pub fn with_retention_period(mut self, period: Duration) -> Self {
        self.retention_period = period;
        self
    }

    /// Sets the block size.
    pub fn with_block_size(mut self, size: Duration) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the buffer past.
    pub fn with_buffer_past(mut self, buffer: Duration) -> Self {
        self.buffer_past = buffer;
        self
    }

    /// Sets the buffer future.
    pub fn with_buffer_future(mut self, buffer: Duration) -> Self {
        self.buffer_future = buffer;
        self
    }

    /// Checks that the settings describe a usable window.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Config`] if the block size is zero, the
    /// retention period is shorter than one block, or either buffer exceeds
    /// the retention period.
    pub fn validate(&self) -> Result<()> {
        if self.block_size.is_zero() {
            return Err(BootstrapError::Config("block size must be positive".into()));
        }
        if self.retention_period < self.block_size {
            return Err(BootstrapError::Config(format!(
                "retention period {:?} is shorter than block size {:?}",
                self.retention_period, self.block_size
            )));
        }
        if self.buffer_past > self.retention_period {
            return Err(BootstrapError::Config(format!(
                "buffer past {:?} exceeds retention period {:?}",
                self.buffer_past, self.retention_period
            )));
        }
        if self.buffer_future > self.retention_period {
            return Err(BootstrapError::Config(format!(
                "buffer future {:?} exceeds retention period {:?}",
                self.buffer_future, self.retention_period
            )));
        }
        Ok(())
    }
}

/// Mutability of a block relative to "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// No more writes can land in the block; bootstrap it once.
    Sealed,
    /// Writes may still arrive; bootstrap is best-effort.
    Mutable,
}

/// The set of blocks retained at a given instant.
///
/// Two nodes with the same options and the same `now` compute identical
/// block starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionWindow {
    options: RetentionOptions,
    now: Timestamp,
    earliest: Timestamp,
    latest: Timestamp,
}

impl RetentionWindow {
    /// Computes the window at `now` (nanoseconds since epoch).
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Config`] if the options are inconsistent.
    pub fn at(options: RetentionOptions, now: Timestamp) -> Result<Self> {
        options.validate()?;
        let block_nanos = duration_nanos(options.block_size);
        let lower = now
            .saturating_sub(duration_nanos(options.retention_period))
            .saturating_sub(duration_nanos(options.buffer_past));
        let upper = now.saturating_add(duration_nanos(options.buffer_future));
        Ok(Self {
            earliest: align_block_start(lower, block_nanos),
            latest: align_block_start(upper, block_nanos),
            options,
            now,
        })
    }

    /// Computes the window at the current wall-clock time.
    pub fn now(options: RetentionOptions) -> Result<Self> {
        Self::at(options, current_timestamp_nanos()?)
    }

    /// Returns the options the window was computed from.
    pub fn options(&self) -> &RetentionOptions {
        &self.options
    }

    /// Returns the instant the window was computed at.
    pub fn computed_at(&self) -> Timestamp {
        self.now
    }

    /// Returns the first retained block start.
    pub fn earliest_block_start(&self) -> Timestamp {
        self.earliest
    }

    /// Returns the last retained block start.
    pub fn latest_block_start(&self) -> Timestamp {
        self.latest
    }

    /// Returns every retained block, oldest first.
    pub fn blocks(&self) -> Vec<BlockWindow> {
        let step = duration_nanos(self.options.block_size);
        let mut blocks = Vec::new();
        let mut current = self.earliest;
        while current <= self.latest {
            blocks.push(BlockWindow::new(current, self.options.block_size));
            current += step;
        }
        blocks
    }

    /// Returns true if `block_start` is an aligned block inside the window.
    pub fn contains(&self, block_start: Timestamp) -> bool {
        let step = duration_nanos(self.options.block_size);
        block_start.rem_euclid(step) == 0
            && block_start >= self.earliest
            && block_start <= self.latest
    }

    /// Returns true if the block starting at `block_start` is sealed.
    pub fn is_sealed(&self, block_start: Timestamp) -> bool {
        let end = block_start.saturating_add(duration_nanos(self.options.block_size));
        end <= self.now.saturating_sub(duration_nanos(self.options.buffer_past))
    }

    /// Returns the state of a block, or `None` if it is outside the window.
    pub fn state(&self, block_start: Timestamp) -> Option<BlockState> {
        if !self.contains(block_start) {
            return None;
        }
        Some(if self.is_sealed(block_start) {
            BlockState::Sealed
        } else {
            BlockState::Mutable
        })
    }
}

/// Returns the current wall-clock time in nanoseconds since the epoch.
pub fn current_timestamp_nanos() -> Result<Timestamp> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| BootstrapError::Config(format!("system clock before epoch: {err}")))?;
    Ok(duration_nanos(now))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: i64 = 60_000_000_000;
    const HOUR: i64 = 60 * MINUTE;

    fn six_hour_options() -> RetentionOptions {
        RetentionOptions::default()
            .with_retention_period(Duration::from_secs(6 * 3600))
            .with_block_size(Duration::from_secs(2 * 3600))
            .with_buffer_past(Duration::from_secs(10 * 60))
            .with_buffer_future(Duration::from_secs(2 * 60))
    }

    #[test]
    fn test_window_blocks_and_states() {
        let now = 10 * HOUR + 30 * MINUTE;
        let window = RetentionWindow::at(six_hour_options(), now).unwrap();

        let starts: Vec<_> = window.blocks().iter().map(|b| b.start_ts).collect();
        assert_eq!(starts, vec![4 * HOUR, 6 * HOUR, 8 * HOUR, 10 * HOUR]);

        assert_eq!(window.state(4 * HOUR), Some(BlockState::Sealed));
        assert_eq!(window.state(8 * HOUR), Some(BlockState::Sealed));
        assert_eq!(window.state(10 * HOUR), Some(BlockState::Mutable));
        assert_eq!(window.state(2 * HOUR), None);
        assert_eq!(window.state(12 * HOUR), None);
    }

    #[test]
    fn test_previous_block_mutable_inside_buffer_past() {
        let now = 10 * HOUR + 5 * MINUTE;
        let window = RetentionWindow::at(six_hour_options(), now).unwrap();
        assert_eq!(window.state(8 * HOUR), Some(BlockState::Mutable));
        assert_eq!(window.state(6 * HOUR), Some(BlockState::Sealed));
    }

    #[test]
    fn test_buffer_future_reaches_next_block() {
        let now = 11 * HOUR + 59 * MINUTE;
        let window = RetentionWindow::at(six_hour_options(), now).unwrap();
        assert_eq!(window.latest_block_start(), 12 * HOUR);
        assert!(window.contains(12 * HOUR));
        assert!(!window.contains(12 * HOUR + 1));
    }

    #[test]
    fn test_identical_options_identical_blocks() {
        let now = 123 * HOUR + 17 * MINUTE;
        let a = RetentionWindow::at(six_hour_options(), now).unwrap();
        let b = RetentionWindow::at(six_hour_options(), now).unwrap();
        assert_eq!(a.blocks(), b.blocks());
    }

    #[test]
    fn test_validate_rejects_inconsistent_options() {
        let zero_block = six_hour_options().with_block_size(Duration::ZERO);
        assert!(matches!(zero_block.validate(), Err(BootstrapError::Config(_))));

        let short_retention = six_hour_options().with_retention_period(Duration::from_secs(3600));
        assert!(short_retention.validate().is_err());

        let past = six_hour_options().with_buffer_past(Duration::from_secs(7 * 3600));
        assert!(past.validate().is_err());
        assert!(RetentionWindow::at(past, 0).is_err());

        let future = six_hour_options().with_buffer_future(Duration::from_secs(7 * 3600));
        assert!(future.validate().is_err());

        assert!(RetentionOptions::default().validate().is_ok());
    }
}
