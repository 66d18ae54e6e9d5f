//! Work item model - the story being estimated.

use serde::{Deserialize, Serialize};

use crate::id::{SprintId, WorkItemId};
use crate::Time;

/// A unit of work carrying a point estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique identifier
    pub id: WorkItemId,

    /// Owning sprint
    pub sprint_id: SprintId,

    /// Story title
    pub title: String,

    /// Detailed description
    pub description: String,

    /// Finalized point estimate
    pub story_points: Option<u32>,

    /// Current status
    pub status: WorkItemStatus,

    /// Ordering key within the sprint
    pub position: i64,

    /// Creation timestamp
    pub created_at: Time,

    /// Last update timestamp
    pub updated_at: Time,

    /// When the estimate was finalized
    pub completed_at: Option<Time>,
}

impl WorkItem {
    /// Create a pending work item.
    pub fn new(sprint_id: SprintId, title: impl Into<String>, position: i64) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: WorkItemId::new(),
            sprint_id,
            title: title.into(),
            description: String::new(),
            story_points: None,
            status: WorkItemStatus::Pending,
            position,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Points counted toward sprint totals (missing estimate counts as 0).
    pub fn points(&self) -> u32 {
        self.story_points.unwrap_or(0)
    }

    /// Whether the item has been finalized.
    pub fn is_completed(&self) -> bool {
        self.status == WorkItemStatus::Completed
    }
}

/// Work item status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkItemStatus {
    /// Not yet estimated
    Pending,
    /// An estimation session is running
    Voting,
    /// Estimate finalized
    Completed,
}

impl WorkItemStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemStatus::Pending => "pending",
            WorkItemStatus::Voting => "voting",
            WorkItemStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WorkItemStatus::Pending),
            "voting" => Ok(WorkItemStatus::Voting),
            "completed" => Ok(WorkItemStatus::Completed),
            other => Err(format!("unknown work item status '{}'", other)),
        }
    }
}
