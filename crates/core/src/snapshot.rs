//! Daily snapshot model - one row of the actual burndown series.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::id::{SnapshotId, SprintId};
use crate::Time;

/// Remaining and completed points of a sprint on one calendar day.
///
/// Unique per `(sprint_id, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySnapshot {
    /// Unique identifier
    pub id: SnapshotId,

    /// Owning sprint
    pub sprint_id: SprintId,

    /// Calendar day
    pub date: NaiveDate,

    /// Points not yet completed
    pub remaining_points: u32,

    /// Points completed
    pub completed_points: u32,

    /// When this row was last computed
    pub recorded_at: Time,
}

impl DailySnapshot {
    /// Create a snapshot for `date`.
    pub fn new(sprint_id: SprintId, date: NaiveDate, remaining_points: u32, completed_points: u32) -> Self {
        Self {
            id: SnapshotId::new(),
            sprint_id,
            date,
            remaining_points,
            completed_points,
            recorded_at: chrono::Utc::now(),
        }
    }
}
