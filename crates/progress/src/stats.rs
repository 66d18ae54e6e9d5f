//! Sprint dashboard statistics.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sprintpoker_core::{day_count, Sprint};

use crate::burndown::PointTotals;

/// Headline numbers for a sprint on a given day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SprintStats {
    /// Points over every item
    pub total_points: u32,
    /// Points of completed items
    pub completed_points: u32,
    /// Points still open
    pub remaining_points: u32,
    /// Completed share of the total, whole percent
    pub completion_percent: u32,
    /// Days left until the sprint ends
    pub days_remaining: u32,
    /// Completed points per elapsed day
    pub velocity: f64,
    /// Points per remaining day needed to finish; `None` when no days remain
    pub points_per_day_needed: Option<f64>,
    /// Whether the current velocity covers the remaining points in time
    pub on_track: bool,
}

impl SprintStats {
    /// Compute the statistics of `sprint` as of `today`.
    pub fn compute(sprint: &Sprint, totals: PointTotals, today: NaiveDate) -> Self {
        let span = day_count(sprint.start_date, sprint.end_date).max(1);
        let elapsed = day_count(sprint.start_date, today).clamp(1, span);
        let days_remaining = (sprint.end_date - today.max(sprint.start_date)).num_days().max(0) as u32;

        let completion_percent = if totals.total == 0 {
            0
        } else {
            round_half_up(100 * totals.completed as u64, totals.total as u64) as u32
        };

        let points_per_day_needed =
            (days_remaining > 0).then(|| tenths(totals.remaining as u64, days_remaining as u64));

        // remaining <= (completed / elapsed) * days_remaining, cross-multiplied
        let on_track =
            totals.remaining as u64 * elapsed as u64 <= totals.completed as u64 * days_remaining as u64;

        Self {
            total_points: totals.total,
            completed_points: totals.completed,
            remaining_points: totals.remaining,
            completion_percent,
            days_remaining,
            velocity: tenths(totals.completed as u64, elapsed as u64),
            points_per_day_needed,
            on_track,
        }
    }
}

/// `num / den` rounded half-up to an integer. `den` must be non-zero.
fn round_half_up(num: u64, den: u64) -> u64 {
    (2 * num + den) / (2 * den)
}

/// `num / den` rounded half-up to one decimal place.
fn tenths(num: u64, den: u64) -> f64 {
    round_half_up(10 * num, den) as f64 / 10.0
}
