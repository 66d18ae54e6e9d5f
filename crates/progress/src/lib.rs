//! Sprint progress: burndown series, daily snapshots and dashboard stats.

#![warn(missing_docs)]

pub mod burndown;
pub mod error;
pub mod stats;
pub mod tracker;

pub use burndown::{actual_series, ideal_series, point_totals, Burndown, PointTotals};
pub use error::{ProgressError, Result};
pub use stats::SprintStats;
pub use tracker::{BurndownTracker, ProgressTracker};
