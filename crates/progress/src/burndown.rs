//! Burndown series.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sprintpoker_core::{day_count, DailySnapshot, WorkItem};

/// Point sums over a set of work items. Unestimated items count as 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointTotals {
    /// Sum over every item
    pub total: u32,
    /// Sum over completed items
    pub completed: u32,
    /// `total - completed`
    pub remaining: u32,
}

/// Sum the points of `items`.
pub fn point_totals<'a>(items: impl IntoIterator<Item = &'a WorkItem>) -> PointTotals {
    let (total, completed) = items.into_iter().fold((0u32, 0u32), |(total, completed), item| {
        let points = item.points();
        let completed = if item.is_completed() { completed.saturating_add(points) } else { completed };
        (total.saturating_add(points), completed)
    });

    PointTotals {
        total,
        completed,
        remaining: total - completed,
    }
}

/// Ideal remaining points for each day from `start` to `end` inclusive.
///
/// Linear from `total` on the first day to 0 on the last. A single-day
/// sprint has no partial burn and yields `[0]`. An inverted range yields
/// nothing.
pub fn ideal_series(start: NaiveDate, end: NaiveDate, total: u32) -> Vec<f64> {
    let days = day_count(start, end) as usize;
    if days <= 1 {
        return vec![0.0; days];
    }

    let last = (days - 1) as f64;
    let total = total as f64;
    (0..days)
        .map(|i| total * (last - i as f64) / last)
        .collect()
}

/// Snapshot remaining points lined up with `dates`; `None` where no snapshot
/// was recorded for that day.
pub fn actual_series(dates: &[NaiveDate], snapshots: &[DailySnapshot]) -> Vec<Option<u32>> {
    let by_date: HashMap<NaiveDate, u32> = snapshots
        .iter()
        .map(|s| (s.date, s.remaining_points))
        .collect();
    dates.iter().map(|d| by_date.get(d).copied()).collect()
}

/// Both burndown series for a sprint, indexed by day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Burndown {
    /// Sprint days, start to end
    pub dates: Vec<NaiveDate>,
    /// Ideal remaining points per day
    pub ideal: Vec<f64>,
    /// Recorded remaining points per day, `None` for gaps
    pub actual: Vec<Option<u32>>,
    /// Point total the ideal line starts from
    pub total_points: u32,
}

impl Burndown {
    /// Build from the sprint range, its point total and recorded snapshots.
    pub fn new(start: NaiveDate, end: NaiveDate, total_points: u32, snapshots: &[DailySnapshot]) -> Self {
        let dates: Vec<NaiveDate> = start
            .iter_days()
            .take(day_count(start, end) as usize)
            .collect();
        let ideal = ideal_series(start, end, total_points);
        let actual = actual_series(&dates, snapshots);
        Self { dates, ideal, actual, total_points }
    }

    /// `(date, ideal, actual)` rows.
    pub fn rows(&self) -> impl Iterator<Item = (NaiveDate, f64, Option<u32>)> + '_ {
        self.dates
            .iter()
            .zip(&self.ideal)
            .zip(&self.actual)
            .map(|((d, i), a)| (*d, *i, *a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprintpoker_core::{SprintId, WorkItemStatus};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    #[test]
    fn test_five_day_ideal() {
        assert_eq!(ideal_series(date(6), date(10), 100), vec![100.0, 75.0, 50.0, 25.0, 0.0]);
    }

    #[test]
    fn test_single_day_ideal_is_zero() {
        assert_eq!(ideal_series(date(6), date(6), 40), vec![0.0]);
    }

    #[test]
    fn test_ideal_ends_exactly_at_zero() {
        let series = ideal_series(date(1), date(4), 10);
        assert_eq!(series.len(), 4);
        assert_eq!(series[0], 10.0);
        assert_eq!(series[3], 0.0);
    }

    #[test]
    fn test_inverted_range_is_empty() {
        assert!(ideal_series(date(10), date(6), 100).is_empty());
    }

    #[test]
    fn test_actual_matches_by_date_with_gaps() {
        let sprint = SprintId::new();
        let dates: Vec<_> = (6..=10).map(date).collect();
        let snapshots = vec![
            DailySnapshot::new(sprint, date(9), 30, 70),
            DailySnapshot::new(sprint, date(6), 100, 0),
            DailySnapshot::new(sprint, date(30), 0, 100),
        ];

        let actual = actual_series(&dates, &snapshots);
        assert_eq!(actual, vec![Some(100), None, None, Some(30), None]);
    }

    #[test]
    fn test_zero_snapshot_is_not_a_gap() {
        let sprint = SprintId::new();
        let actual = actual_series(&[date(6)], &[DailySnapshot::new(sprint, date(6), 0, 13)]);
        assert_eq!(actual, vec![Some(0)]);
    }

    #[test]
    fn test_point_totals() {
        let sprint = SprintId::new();
        let mut done = WorkItem::new(sprint, "done", 0);
        done.story_points = Some(8);
        done.status = WorkItemStatus::Completed;
        let mut open = WorkItem::new(sprint, "open", 1);
        open.story_points = Some(5);
        let unestimated = WorkItem::new(sprint, "new", 2);

        let totals = point_totals([&done, &open, &unestimated]);
        assert_eq!(totals, PointTotals { total: 13, completed: 8, remaining: 5 });
    }

    #[test]
    fn test_burndown_rows() {
        let sprint = SprintId::new();
        let burndown = Burndown::new(date(6), date(8), 20, &[DailySnapshot::new(sprint, date(7), 12, 8)]);
        let rows: Vec<_> = burndown.rows().collect();
        assert_eq!(rows, vec![(date(6), 20.0, None), (date(7), 10.0, Some(12)), (date(8), 0.0, None)]);
    }
}
