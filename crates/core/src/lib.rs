//! SprintPoker core data models.
//!
//! This crate defines the data structures shared by the estimation
//! coordinator, the storage backends and the progress aggregator.

#![warn(missing_docs)]

// Core identities
mod id;
mod error;

// Planning
mod sprint;
mod work_item;
mod snapshot;

// Estimation
mod session;
mod vote;
mod event;

// Re-exports
pub use id::*;
pub use error::ValidationError;

// Planning
pub use sprint::{day_count, validate_range, Sprint};
pub use work_item::{WorkItem, WorkItemStatus};
pub use snapshot::DailySnapshot;

// Estimation
pub use session::{EstimationSession, SessionState};
pub use vote::{estimate_votes, finalize_estimate, Card, PointDomain, Vote};
pub use event::{ChangeEvent, ChangeKind};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
