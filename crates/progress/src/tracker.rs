//! Progress tracking service.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use sprintpoker_core::{DailySnapshot, Sprint, SprintId, WorkItem};
use sprintpoker_storage::Storage;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::burndown::{point_totals, Burndown, PointTotals};
use crate::error::{ProgressError, Result};
use crate::stats::SprintStats;

/// Progress tracking service.
#[async_trait]
pub trait ProgressTracker: Send + Sync {
    /// Current point totals of a sprint.
    async fn sprint_totals(&self, sprint_id: SprintId) -> Result<PointTotals>;

    /// Write (or overwrite) the snapshot for `date` from the current totals.
    async fn record_snapshot(&self, sprint_id: SprintId, date: NaiveDate) -> Result<DailySnapshot>;

    /// Recreate every snapshot from the sprint start up to `through` (capped
    /// at the sprint end) using the completion dates of its work items.
    async fn rebuild_snapshots(&self, sprint_id: SprintId, through: NaiveDate) -> Result<Vec<DailySnapshot>>;

    /// Ideal and actual burndown series.
    async fn burndown(&self, sprint_id: SprintId) -> Result<Burndown>;

    /// Dashboard statistics as of `today`.
    async fn sprint_stats(&self, sprint_id: SprintId, today: NaiveDate) -> Result<SprintStats>;
}

/// Progress tracker backed by [`Storage`].
pub struct BurndownTracker<S: Storage> {
    storage: Arc<S>,
    /// Serialises snapshot writes so the last write always reflects the
    /// latest committed work items.
    refresh: Mutex<()>,
}

impl<S: Storage> BurndownTracker<S> {
    /// Create a tracker over shared storage.
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            refresh: Mutex::new(()),
        }
    }

    async fn load(&self, sprint_id: SprintId) -> Result<(Sprint, Vec<WorkItem>)> {
        let sprint = self
            .storage
            .load_sprint(sprint_id)
            .await?
            .ok_or_else(|| ProgressError::NotFound(format!("sprint {}", sprint_id)))?;
        let items = self.storage.list_work_items(sprint_id).await?;
        Ok((sprint, items))
    }

    async fn cache_total(&self, mut sprint: Sprint, total: u32) -> Result<()> {
        if sprint.total_points != Some(total) {
            sprint.total_points = Some(total);
            self.storage.save_sprint(&sprint).await?;
        }
        Ok(())
    }
}

/// Points completed on or before `date`. Items completed without a recorded
/// date count from the sprint start.
fn completed_by(items: &[WorkItem], date: NaiveDate) -> u32 {
    items
        .iter()
        .filter(|i| i.is_completed())
        .filter(|i| i.completed_at.map_or(true, |at| at.date_naive() <= date))
        .map(|i| i.points())
        .sum()
}

#[async_trait]
impl<S: Storage + 'static> ProgressTracker for BurndownTracker<S> {
    async fn sprint_totals(&self, sprint_id: SprintId) -> Result<PointTotals> {
        let (_, items) = self.load(sprint_id).await?;
        Ok(point_totals(&items))
    }

    async fn record_snapshot(&self, sprint_id: SprintId, date: NaiveDate) -> Result<DailySnapshot> {
        let _guard = self.refresh.lock().await;
        let (sprint, items) = self.load(sprint_id).await?;
        let totals = point_totals(&items);

        let snapshot = DailySnapshot::new(sprint_id, date, totals.remaining, totals.completed);
        self.storage.save_snapshot(&snapshot).await?;
        self.cache_total(sprint, totals.total).await?;

        debug!(%sprint_id, %date, remaining = totals.remaining, completed = totals.completed, "snapshot recorded");
        Ok(snapshot)
    }

    async fn rebuild_snapshots(&self, sprint_id: SprintId, through: NaiveDate) -> Result<Vec<DailySnapshot>> {
        let _guard = self.refresh.lock().await;
        let (sprint, items) = self.load(sprint_id).await?;
        if through < sprint.start_date {
            return Err(ProgressError::InvalidInput(format!(
                "{} is before the start of sprint {} ({})",
                through, sprint.name, sprint.start_date
            )));
        }

        let total = point_totals(&items).total;
        let mut snapshots = Vec::new();
        for date in sprint.days().take_while(|d| *d <= through) {
            let completed = completed_by(&items, date).min(total);
            let snapshot = DailySnapshot::new(sprint_id, date, total - completed, completed);
            self.storage.save_snapshot(&snapshot).await?;
            snapshots.push(snapshot);
        }
        self.cache_total(sprint, total).await?;

        info!(%sprint_id, days = snapshots.len(), "snapshots rebuilt");
        Ok(snapshots)
    }

    async fn burndown(&self, sprint_id: SprintId) -> Result<Burndown> {
        let (sprint, items) = self.load(sprint_id).await?;
        let snapshots = self.storage.list_snapshots(sprint_id).await?;
        let total = point_totals(&items).total;
        Ok(Burndown::new(sprint.start_date, sprint.end_date, total, &snapshots))
    }

    async fn sprint_stats(&self, sprint_id: SprintId, today: NaiveDate) -> Result<SprintStats> {
        let (sprint, items) = self.load(sprint_id).await?;
        Ok(SprintStats::compute(&sprint, point_totals(&items), today))
    }
}
