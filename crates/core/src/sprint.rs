//! Sprint model - a fixed-date iteration grouping work items.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::id::{ProjectId, SprintId};
use crate::Time;

/// A time-boxed iteration owned by a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sprint {
    /// Unique identifier
    pub id: SprintId,

    /// Owning project
    pub project_id: ProjectId,

    /// Sprint name
    pub name: String,

    /// First calendar day of the sprint
    pub start_date: NaiveDate,

    /// Last calendar day of the sprint (inclusive)
    pub end_date: NaiveDate,

    /// Sprint goal text
    pub goal: Option<String>,

    /// Whether this is the project's active sprint
    pub is_active: bool,

    /// Point total as of the last recorded snapshot
    pub total_points: Option<u32>,

    /// When created
    pub created_at: Time,
}

impl Sprint {
    /// Create a sprint, rejecting a start date after the end date.
    pub fn new(
        project_id: ProjectId,
        name: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Self, ValidationError> {
        validate_range(start_date, end_date)?;
        Ok(Self {
            id: SprintId::new(),
            project_id,
            name: name.into(),
            start_date,
            end_date,
            goal: None,
            is_active: false,
            total_points: None,
            created_at: chrono::Utc::now(),
        })
    }

    /// Set the sprint goal.
    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = Some(goal.into());
        self
    }

    /// Number of calendar days covered, start and end inclusive.
    pub fn day_count(&self) -> u32 {
        day_count(self.start_date, self.end_date)
    }

    /// Iterate every calendar day of the sprint.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        self.start_date
            .iter_days()
            .take(self.day_count() as usize)
    }

    /// Whether `date` falls inside the sprint.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

/// Check that `start <= end`.
pub fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<(), ValidationError> {
    if start > end {
        return Err(ValidationError::DateRange { start, end });
    }
    Ok(())
}

/// Inclusive day count between two dates; 0 for an inverted range.
pub fn day_count(start: NaiveDate, end: NaiveDate) -> u32 {
    if start > end {
        return 0;
    }
    (end - start).num_days() as u32 + 1
}
