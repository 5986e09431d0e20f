//! Bootstrap lifecycle: retention window, block status records and range planning.

pub mod planner;
pub mod retention;
pub mod status;

pub use planner::{BootstrapRangePlanner, BootstrapUnit, PriorBlock, PriorStageResult, ShardPlan};
pub use retention::{BlockState, RetentionOptions, RetentionWindow};
pub use status::{BlockStatus, ShardBootstrapStatus};
