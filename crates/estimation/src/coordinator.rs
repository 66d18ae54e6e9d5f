//! Estimation session coordinator.
//!
//! Every transition is one conditional storage write. The coordinator maps
//! the outcome to a typed result, publishes the change while still holding
//! the session's ordering lock, and refreshes the sprint snapshot when a
//! work item changed.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use sprintpoker_core::{
    Card, ChangeKind, EstimationSession, ParticipantId, PointDomain, SessionId, SessionState,
    SprintId, Vote, WorkItem, WorkItemId,
};
use sprintpoker_progress::{Burndown, BurndownTracker, ProgressTracker};
use sprintpoker_realtime::{Notifier, Subscription};
use sprintpoker_storage::{BeginOutcome, Conditional, Storage};
use tracing::{debug, info, warn};

use crate::aggregate::VoteStats;
use crate::error::{EstimationError, Result};
use crate::locks::KeyedLocks;

/// Everything a client needs to render a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    /// The session
    pub session: EstimationSession,
    /// Work item under estimation
    pub work_item: WorkItem,
    /// Votes cast so far
    pub votes: Vec<Vote>,
    /// Statistics, once the votes are revealed
    pub stats: Option<VoteStats>,
}

/// Result of a successful finalize.
#[derive(Debug, Clone, Serialize)]
pub struct Finalization {
    /// The session, now finalized
    pub session: EstimationSession,
    /// The work item with its committed estimate
    pub work_item: WorkItem,
    /// Statistics the estimate was derived from
    pub stats: VoteStats,
}

/// Operations the presentation layer calls.
#[async_trait]
pub trait EstimationService: Send + Sync {
    /// Open a new round for a work item, superseding any live round.
    async fn start_session(&self, work_item_id: WorkItemId, started_by: ParticipantId) -> Result<EstimationSession>;

    /// Cast or overwrite a participant's vote.
    async fn submit_vote(&self, session_id: SessionId, participant_id: ParticipantId, card: Card) -> Result<Vote>;

    /// Show the votes. Calling it again on a revealed session is a no-op.
    async fn reveal_session(&self, session_id: SessionId) -> Result<EstimationSession>;

    /// Commit the rounded mean as the work item's estimate.
    async fn finalize_session(&self, session_id: SessionId) -> Result<Finalization>;

    /// Discard every vote and reopen voting.
    async fn reset_session(&self, session_id: SessionId) -> Result<EstimationSession>;

    /// Current state of a session.
    async fn session_view(&self, session_id: SessionId) -> Result<SessionView>;

    /// Subscribe and then fetch the full view, so nothing committed after
    /// the fetch can be missed.
    async fn reconnect(&self, session_id: SessionId) -> Result<(Subscription, SessionView)>;

    /// Ideal and actual burndown of a sprint.
    async fn sprint_burndown(&self, sprint_id: SprintId) -> Result<Burndown>;
}

/// [`EstimationService`] over a [`Storage`] backend and a [`Notifier`].
pub struct SessionCoordinator<S: Storage> {
    storage: Arc<S>,
    notifier: Arc<dyn Notifier>,
    tracker: Arc<dyn ProgressTracker>,
    domain: PointDomain,
    session_locks: KeyedLocks<SessionId>,
    item_locks: KeyedLocks<WorkItemId>,
}

impl<S: Storage + 'static> SessionCoordinator<S> {
    /// Create a coordinator with the default point domain.
    pub fn new(storage: Arc<S>, notifier: Arc<dyn Notifier>) -> Self {
        let tracker = Arc::new(BurndownTracker::new(storage.clone()));
        Self {
            storage,
            notifier,
            tracker,
            domain: PointDomain::default(),
            session_locks: KeyedLocks::new(),
            item_locks: KeyedLocks::new(),
        }
    }

    /// Use a different point domain.
    pub fn with_domain(mut self, domain: PointDomain) -> Self {
        self.domain = domain;
        self
    }

    /// Use a different progress tracker.
    pub fn with_tracker(mut self, tracker: Arc<dyn ProgressTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    /// Cards participants may play.
    pub fn domain(&self) -> &PointDomain {
        &self.domain
    }
}

impl<S: Storage> SessionCoordinator<S> {
    async fn load_session(&self, session_id: SessionId) -> Result<EstimationSession> {
        self.storage
            .load_session(session_id)
            .await?
            .ok_or_else(|| EstimationError::NotFound(format!("session {}", session_id)))
    }

    async fn load_work_item(&self, work_item_id: WorkItemId) -> Result<WorkItem> {
        self.storage
            .load_work_item(work_item_id)
            .await?
            .ok_or_else(|| EstimationError::NotFound(format!("work item {}", work_item_id)))
    }

    /// Record today's snapshot for the item's sprint. Snapshots are derived
    /// data, so a failure is logged rather than returned.
    async fn refresh_progress(&self, work_item: &WorkItem) {
        let today = chrono::Utc::now().date_naive();
        if let Err(e) = self.tracker.record_snapshot(work_item.sprint_id, today).await {
            warn!(sprint_id = %work_item.sprint_id, error = %e, "snapshot refresh failed");
        }
    }
}

fn refused(session: &EstimationSession, operation: &str) -> EstimationError {
    EstimationError::InvalidState(format!(
        "cannot {} session {} while {} (allowed: {})",
        operation,
        session.id,
        session.state,
        session.state.allowed_operations().join(", ")
    ))
}

#[async_trait]
impl<S: Storage + 'static> EstimationService for SessionCoordinator<S> {
    async fn start_session(&self, work_item_id: WorkItemId, started_by: ParticipantId) -> Result<EstimationSession> {
        let _item_guard = self.item_locks.lock(work_item_id).await;

        // Starts on one item are serialised, so the live set cannot grow
        // before `begin_session` runs.
        let mut live: Vec<SessionId> = self
            .storage
            .list_sessions(work_item_id)
            .await?
            .into_iter()
            .filter(|s| s.is_active)
            .map(|s| s.id)
            .collect();
        live.sort();
        let mut session_guards = Vec::with_capacity(live.len());
        for id in &live {
            session_guards.push(self.session_locks.lock(*id).await);
        }

        let session = EstimationSession::new(work_item_id, started_by);
        match self.storage.begin_session(&session).await? {
            BeginOutcome::Started { superseded } => {
                for old in &superseded {
                    self.notifier.publish(*old, ChangeKind::Superseded { by: session.id });
                }
                self.notifier
                    .publish(session.id, ChangeKind::SessionStarted { work_item_id });
                drop(session_guards);

                info!(session_id = %session.id, %work_item_id, superseded = superseded.len(), "session started");
                let item = self.load_work_item(work_item_id).await?;
                self.refresh_progress(&item).await;
                Ok(session)
            }
            BeginOutcome::ItemCompleted => Err(EstimationError::InvalidState(format!(
                "work item {} is already completed",
                work_item_id
            ))),
            BeginOutcome::ItemMissing => Err(EstimationError::NotFound(format!("work item {}", work_item_id))),
        }
    }

    async fn submit_vote(&self, session_id: SessionId, participant_id: ParticipantId, card: Card) -> Result<Vote> {
        self.domain.validate(card)?;
        let _guard = self.session_locks.lock(session_id).await;

        let vote = Vote::new(session_id, participant_id, card);
        match self.storage.upsert_vote(&vote).await? {
            Conditional::Applied(stored) => {
                self.notifier
                    .publish(session_id, ChangeKind::VoteCast { vote: stored.clone() });
                debug!(%session_id, participant = %stored.participant_id, %card, "vote stored");
                Ok(stored)
            }
            Conditional::Conflict(session) => Err(refused(&session, "vote on")),
            Conditional::Missing => Err(EstimationError::NotFound(format!("session {}", session_id))),
        }
    }

    async fn reveal_session(&self, session_id: SessionId) -> Result<EstimationSession> {
        let _guard = self.session_locks.lock(session_id).await;

        match self.storage.reveal_session(session_id, chrono::Utc::now()).await? {
            Conditional::Applied(session) => {
                self.notifier.publish(session_id, ChangeKind::Revealed);
                info!(%session_id, "votes revealed");
                Ok(session)
            }
            Conditional::Conflict(session) if session.state == SessionState::Revealed => {
                debug!(%session_id, "already revealed");
                Ok(session)
            }
            Conditional::Conflict(session) if session.state == SessionState::Active => Err(
                EstimationError::InvalidState(format!("session {} has no votes to reveal", session_id)),
            ),
            Conditional::Conflict(session) => Err(refused(&session, "reveal")),
            Conditional::Missing => Err(EstimationError::NotFound(format!("session {}", session_id))),
        }
    }

    async fn finalize_session(&self, session_id: SessionId) -> Result<Finalization> {
        let _guard = self.session_locks.lock(session_id).await;

        match self.storage.finalize_session(session_id, chrono::Utc::now()).await? {
            Conditional::Applied(done) => {
                let estimate = done.work_item.points();
                self.notifier.publish(session_id, ChangeKind::Finalized { estimate });
                info!(%session_id, work_item_id = %done.work_item.id, estimate, "session finalized");
                self.refresh_progress(&done.work_item).await;
                Ok(Finalization {
                    stats: VoteStats::from_votes(&done.votes),
                    session: done.session,
                    work_item: done.work_item,
                })
            }
            Conditional::Conflict(current) if current.state == SessionState::Finalized => {
                debug!(%session_id, "already finalized");
                Err(EstimationError::AlreadyFinalized(session_id))
            }
            Conditional::Conflict(current) if current.state == SessionState::Revealed => {
                Err(EstimationError::InvalidState(format!(
                    "session {} has no numeric votes to finalize",
                    session_id
                )))
            }
            Conditional::Conflict(current) => Err(refused(&current, "finalize")),
            Conditional::Missing => Err(EstimationError::NotFound(format!("session {}", session_id))),
        }
    }

    async fn reset_session(&self, session_id: SessionId) -> Result<EstimationSession> {
        let _guard = self.session_locks.lock(session_id).await;

        match self.storage.reset_session(session_id, chrono::Utc::now()).await? {
            Conditional::Applied(session) => {
                self.notifier.publish(session_id, ChangeKind::Reset);
                info!(%session_id, "session reset");
                Ok(session)
            }
            Conditional::Conflict(session) => Err(refused(&session, "reset")),
            Conditional::Missing => Err(EstimationError::NotFound(format!("session {}", session_id))),
        }
    }

    async fn session_view(&self, session_id: SessionId) -> Result<SessionView> {
        let session = self.load_session(session_id).await?;
        let work_item = self.load_work_item(session.work_item_id).await?;
        let votes = self.storage.list_votes(session_id).await?;

        let stats = matches!(session.state, SessionState::Revealed | SessionState::Finalized)
            .then(|| VoteStats::from_votes(&votes));

        Ok(SessionView {
            session,
            work_item,
            votes,
            stats,
        })
    }

    async fn reconnect(&self, session_id: SessionId) -> Result<(Subscription, SessionView)> {
        let _guard = self.session_locks.lock(session_id).await;

        let subscription = self.notifier.subscribe(session_id);
        match self.session_view(session_id).await {
            Ok(view) => {
                // A finished session publishes nothing more; end the stream now.
                if !view.session.state.is_live() {
                    self.notifier.close(session_id);
                }
                Ok((subscription, view))
            }
            Err(e) => {
                self.notifier.unsubscribe(subscription);
                Err(e)
            }
        }
    }

    async fn sprint_burndown(&self, sprint_id: SprintId) -> Result<Burndown> {
        Ok(self.tracker.burndown(sprint_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprintpoker_core::{DailySnapshot, ProjectId, Sprint, Time, WorkItemStatus};
    use sprintpoker_realtime::{FanoutHub, Notification};
    use sprintpoker_storage::{Finalized, MemoryStorage, Result as StorageResult};

    struct Fixture {
        storage: Arc<MemoryStorage>,
        hub: Arc<FanoutHub>,
        coordinator: Arc<SessionCoordinator<MemoryStorage>>,
        sprint: Sprint,
        item: WorkItem,
    }

    async fn fixture() -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let hub = Arc::new(FanoutHub::default());
        let today = chrono::Utc::now().date_naive();
        let sprint = Sprint::new(ProjectId::new(), "Current", today, today + chrono::Days::new(9)).unwrap();
        let item = WorkItem::new(sprint.id, "Password reset", 0);
        storage.save_sprint(&sprint).await.unwrap();
        storage.save_work_item(&item).await.unwrap();

        let coordinator = Arc::new(SessionCoordinator::new(storage.clone(), hub.clone()));
        Fixture { storage, hub, coordinator, sprint, item }
    }

    fn who(name: &str) -> ParticipantId {
        ParticipantId::new(name)
    }

    async fn vote_all(c: &SessionCoordinator<MemoryStorage>, session_id: SessionId, votes: &[(&str, u32)]) {
        for (name, points) in votes {
            c.submit_vote(session_id, who(name), Card::Points(*points)).await.unwrap();
        }
    }

    fn kind(n: Option<Notification>) -> ChangeKind {
        match n {
            Some(Notification::Event(e)) => e.kind,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let f = fixture().await;
        let session = f.coordinator.start_session(f.item.id, who("pat")).await.unwrap();
        assert_eq!(session.state, SessionState::Active);

        let item = f.storage.load_work_item(f.item.id).await.unwrap().unwrap();
        assert_eq!(item.status, WorkItemStatus::Voting);

        vote_all(&f.coordinator, session.id, &[("pat", 5), ("quinn", 8), ("ray", 13)]).await;
        f.coordinator.reveal_session(session.id).await.unwrap();
        let done = f.coordinator.finalize_session(session.id).await.unwrap();

        assert_eq!(done.stats.mean, 8.7);
        assert_eq!(done.work_item.story_points, Some(9));
        assert_eq!(done.work_item.status, WorkItemStatus::Completed);
        assert_eq!(done.session.state, SessionState::Finalized);
        assert!(!done.session.is_active);

        let snapshots = f.storage.list_snapshots(f.sprint.id).await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].completed_points, 9);
        assert_eq!(snapshots[0].remaining_points, 0);
    }

    #[tokio::test]
    async fn test_resubmission_overwrites() {
        let f = fixture().await;
        let session = f.coordinator.start_session(f.item.id, who("pat")).await.unwrap();

        vote_all(&f.coordinator, session.id, &[("pat", 3), ("pat", 8), ("pat", 5)]).await;

        let votes = f.storage.list_votes(session.id).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].card, Card::Points(5));
    }

    #[tokio::test]
    async fn test_card_outside_domain() {
        let f = fixture().await;
        let session = f.coordinator.start_session(f.item.id, who("pat")).await.unwrap();

        let err = f
            .coordinator
            .submit_vote(session.id, who("pat"), Card::Points(4))
            .await
            .unwrap_err();
        assert!(matches!(err, EstimationError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_late_vote_after_reveal() {
        let f = fixture().await;
        let session = f.coordinator.start_session(f.item.id, who("pat")).await.unwrap();
        vote_all(&f.coordinator, session.id, &[("pat", 3), ("quinn", 5)]).await;
        f.coordinator.reveal_session(session.id).await.unwrap();

        let err = f
            .coordinator
            .submit_vote(session.id, who("ray"), Card::Points(13))
            .await
            .unwrap_err();
        assert!(matches!(err, EstimationError::InvalidState(_)));

        let view = f.coordinator.session_view(session.id).await.unwrap();
        assert_eq!(view.votes.len(), 2);
        assert_eq!(view.stats.unwrap().mean, 4.0);
    }

    #[tokio::test]
    async fn test_reveal_is_idempotent() {
        let f = fixture().await;
        let session = f.coordinator.start_session(f.item.id, who("pat")).await.unwrap();
        vote_all(&f.coordinator, session.id, &[("pat", 2)]).await;

        let first = f.coordinator.reveal_session(session.id).await.unwrap();
        let second = f.coordinator.reveal_session(session.id).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_reveal_requires_a_vote() {
        let f = fixture().await;
        let session = f.coordinator.start_session(f.item.id, who("pat")).await.unwrap();

        let err = f.coordinator.reveal_session(session.id).await.unwrap_err();
        assert!(matches!(err, EstimationError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_finalize_requires_reveal() {
        let f = fixture().await;
        let session = f.coordinator.start_session(f.item.id, who("pat")).await.unwrap();
        vote_all(&f.coordinator, session.id, &[("pat", 2)]).await;

        let err = f.coordinator.finalize_session(session.id).await.unwrap_err();
        assert!(matches!(err, EstimationError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_finalize_with_only_unsure_votes() {
        let f = fixture().await;
        let session = f.coordinator.start_session(f.item.id, who("pat")).await.unwrap();
        f.coordinator.submit_vote(session.id, who("pat"), Card::Unsure).await.unwrap();
        f.coordinator.reveal_session(session.id).await.unwrap();

        let err = f.coordinator.finalize_session(session.id).await.unwrap_err();
        assert!(matches!(err, EstimationError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_second_finalize_is_benign() {
        let f = fixture().await;
        let session = f.coordinator.start_session(f.item.id, who("pat")).await.unwrap();
        vote_all(&f.coordinator, session.id, &[("pat", 2)]).await;
        f.coordinator.reveal_session(session.id).await.unwrap();
        f.coordinator.finalize_session(session.id).await.unwrap();

        let err = f.coordinator.finalize_session(session.id).await.unwrap_err();
        assert!(err.is_benign());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_finalize_single_winner() {
        let f = fixture().await;
        let session = f.coordinator.start_session(f.item.id, who("pat")).await.unwrap();
        vote_all(&f.coordinator, session.id, &[("pat", 3), ("quinn", 5), ("ray", 8)]).await;
        f.coordinator.reveal_session(session.id).await.unwrap();

        let session_id = session.id;
        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = f.coordinator.clone();
            handles.push(tokio::spawn(async move { coordinator.finalize_session(session_id).await }));
        }

        let mut winners = 0;
        let mut benign = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(e) if e.is_benign() => benign += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(benign, 7);

        let item = f.storage.load_work_item(f.item.id).await.unwrap().unwrap();
        assert_eq!(item.story_points, Some(5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reveal() {
        let f = fixture().await;
        let session = f.coordinator.start_session(f.item.id, who("pat")).await.unwrap();
        vote_all(&f.coordinator, session.id, &[("pat", 1)]).await;
        let mut sub = f.hub.subscribe(session.id);

        let session_id = session.id;
        let mut handles = Vec::new();
        for _ in 0..6 {
            let coordinator = f.coordinator.clone();
            handles.push(tokio::spawn(async move { coordinator.reveal_session(session_id).await }));
        }
        for handle in handles {
            let revealed = handle.await.unwrap().unwrap();
            assert_eq!(revealed.state, SessionState::Revealed);
        }

        // One transition, one event.
        assert_eq!(kind(sub.recv().await), ChangeKind::Revealed);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_reset_discards_votes() {
        let f = fixture().await;
        let session = f.coordinator.start_session(f.item.id, who("pat")).await.unwrap();
        vote_all(&f.coordinator, session.id, &[("pat", 2), ("quinn", 3)]).await;
        f.coordinator.reveal_session(session.id).await.unwrap();

        let reset = f.coordinator.reset_session(session.id).await.unwrap();
        assert_eq!(reset.state, SessionState::Active);
        assert!(f.storage.list_votes(session.id).await.unwrap().is_empty());

        // Voting is open again.
        f.coordinator.submit_vote(session.id, who("pat"), Card::Points(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_after_finalize_refused() {
        let f = fixture().await;
        let session = f.coordinator.start_session(f.item.id, who("pat")).await.unwrap();
        vote_all(&f.coordinator, session.id, &[("pat", 2)]).await;
        f.coordinator.reveal_session(session.id).await.unwrap();
        f.coordinator.finalize_session(session.id).await.unwrap();

        let err = f.coordinator.reset_session(session.id).await.unwrap_err();
        assert!(matches!(err, EstimationError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_start_supersedes_previous_round() {
        let f = fixture().await;
        let old = f.coordinator.start_session(f.item.id, who("pat")).await.unwrap();
        let mut old_sub = f.hub.subscribe(old.id);

        let new = f.coordinator.start_session(f.item.id, who("quinn")).await.unwrap();

        assert_eq!(kind(old_sub.recv().await), ChangeKind::Superseded { by: new.id });
        assert!(old_sub.recv().await.is_none());

        let old = f.storage.load_session(old.id).await.unwrap().unwrap();
        assert_eq!(old.state, SessionState::Inactive);
        let err = f
            .coordinator
            .submit_vote(old.id, who("pat"), Card::Points(3))
            .await
            .unwrap_err();
        assert!(matches!(err, EstimationError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_start_on_completed_or_missing_item() {
        let f = fixture().await;
        let session = f.coordinator.start_session(f.item.id, who("pat")).await.unwrap();
        vote_all(&f.coordinator, session.id, &[("pat", 2)]).await;
        f.coordinator.reveal_session(session.id).await.unwrap();
        f.coordinator.finalize_session(session.id).await.unwrap();

        let err = f.coordinator.start_session(f.item.id, who("pat")).await.unwrap_err();
        assert!(matches!(err, EstimationError::InvalidState(_)));

        let err = f.coordinator.start_session(WorkItemId::new(), who("pat")).await.unwrap_err();
        assert!(matches!(err, EstimationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_subscriber_sees_commit_order() {
        let f = fixture().await;
        let session = f.coordinator.start_session(f.item.id, who("pat")).await.unwrap();
        let (mut sub, view) = f.coordinator.reconnect(session.id).await.unwrap();
        assert!(view.votes.is_empty());
        assert!(view.stats.is_none());

        vote_all(&f.coordinator, session.id, &[("pat", 1), ("quinn", 2)]).await;
        f.coordinator.reveal_session(session.id).await.unwrap();
        f.coordinator.finalize_session(session.id).await.unwrap();

        let mut names = Vec::new();
        let mut last = 0;
        while let Some(Notification::Event(event)) = sub.recv().await {
            assert!(event.sequence > last);
            last = event.sequence;
            names.push(event.kind.name());
        }
        assert_eq!(names, vec!["vote_cast", "vote_cast", "revealed", "finalized"]);
    }

    #[tokio::test]
    async fn test_reconnect_to_finished_session_ends_stream() {
        let f = fixture().await;
        let session = f.coordinator.start_session(f.item.id, who("pat")).await.unwrap();
        vote_all(&f.coordinator, session.id, &[("pat", 3)]).await;
        f.coordinator.reveal_session(session.id).await.unwrap();
        f.coordinator.finalize_session(session.id).await.unwrap();

        let (mut sub, view) = f.coordinator.reconnect(session.id).await.unwrap();
        assert_eq!(view.session.state, SessionState::Finalized);
        assert!(sub.recv().await.is_none());
        assert_eq!(f.hub.subscriber_count(session.id), 0);
    }

    /// Replays a round from "another process" right before finalize runs.
    struct ReplayBeforeFinalize {
        inner: MemoryStorage,
    }

    #[async_trait]
    impl Storage for ReplayBeforeFinalize {
        async fn save_sprint(&self, sprint: &Sprint) -> StorageResult<()> {
            self.inner.save_sprint(sprint).await
        }
        async fn load_sprint(&self, id: SprintId) -> StorageResult<Option<Sprint>> {
            self.inner.load_sprint(id).await
        }
        async fn list_sprints(&self, project_id: ProjectId) -> StorageResult<Vec<Sprint>> {
            self.inner.list_sprints(project_id).await
        }
        async fn delete_sprint(&self, id: SprintId) -> StorageResult<()> {
            self.inner.delete_sprint(id).await
        }
        async fn save_work_item(&self, item: &WorkItem) -> StorageResult<()> {
            self.inner.save_work_item(item).await
        }
        async fn load_work_item(&self, id: WorkItemId) -> StorageResult<Option<WorkItem>> {
            self.inner.load_work_item(id).await
        }
        async fn list_work_items(&self, sprint_id: SprintId) -> StorageResult<Vec<WorkItem>> {
            self.inner.list_work_items(sprint_id).await
        }
        async fn delete_work_item(&self, id: WorkItemId) -> StorageResult<()> {
            self.inner.delete_work_item(id).await
        }
        async fn load_session(&self, id: SessionId) -> StorageResult<Option<EstimationSession>> {
            self.inner.load_session(id).await
        }
        async fn list_sessions(&self, work_item_id: WorkItemId) -> StorageResult<Vec<EstimationSession>> {
            self.inner.list_sessions(work_item_id).await
        }
        async fn begin_session(&self, session: &EstimationSession) -> StorageResult<BeginOutcome> {
            self.inner.begin_session(session).await
        }
        async fn reveal_session(&self, id: SessionId, at: Time) -> StorageResult<Conditional<EstimationSession>> {
            self.inner.reveal_session(id, at).await
        }
        async fn reset_session(&self, id: SessionId, at: Time) -> StorageResult<Conditional<EstimationSession>> {
            self.inner.reset_session(id, at).await
        }
        async fn finalize_session(&self, id: SessionId, at: Time) -> StorageResult<Conditional<Finalized>> {
            self.inner.reset_session(id, at).await?;
            self.inner
                .upsert_vote(&Vote::new(id, who("zed"), Card::Points(13)))
                .await?;
            self.inner.reveal_session(id, at).await?;
            self.inner.finalize_session(id, at).await
        }
        async fn upsert_vote(&self, vote: &Vote) -> StorageResult<Conditional<Vote>> {
            self.inner.upsert_vote(vote).await
        }
        async fn load_vote(&self, session_id: SessionId, participant_id: &ParticipantId) -> StorageResult<Option<Vote>> {
            self.inner.load_vote(session_id, participant_id).await
        }
        async fn list_votes(&self, session_id: SessionId) -> StorageResult<Vec<Vote>> {
            self.inner.list_votes(session_id).await
        }
        async fn save_snapshot(&self, snapshot: &DailySnapshot) -> StorageResult<()> {
            self.inner.save_snapshot(snapshot).await
        }
        async fn list_snapshots(&self, sprint_id: SprintId) -> StorageResult<Vec<DailySnapshot>> {
            self.inner.list_snapshots(sprint_id).await
        }
    }

    #[tokio::test]
    async fn test_finalize_commits_votes_seen_at_commit() {
        let storage = Arc::new(ReplayBeforeFinalize { inner: MemoryStorage::new() });
        let today = chrono::Utc::now().date_naive();
        let sprint = Sprint::new(ProjectId::new(), "Current", today, today + chrono::Days::new(4)).unwrap();
        let item = WorkItem::new(sprint.id, "Audit log", 0);
        storage.save_sprint(&sprint).await.unwrap();
        storage.save_work_item(&item).await.unwrap();
        let coordinator = SessionCoordinator::new(storage.clone(), Arc::new(FanoutHub::default()));

        let session = coordinator.start_session(item.id, who("pat")).await.unwrap();
        coordinator.submit_vote(session.id, who("pat"), Card::Points(3)).await.unwrap();
        coordinator.reveal_session(session.id).await.unwrap();

        let done = coordinator.finalize_session(session.id).await.unwrap();

        assert_eq!(done.work_item.story_points, Some(13));
        assert_eq!(done.session.estimate, Some(13));
        assert_eq!(done.stats.count, 1);
        assert_eq!(done.stats.max, 13);
    }

    #[tokio::test]
    async fn test_reconnect_unknown_session() {
        let f = fixture().await;
        let err = f.coordinator.reconnect(SessionId::new()).await.unwrap_err();
        assert!(matches!(err, EstimationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_sprint_burndown() {
        let f = fixture().await;
        let session = f.coordinator.start_session(f.item.id, who("pat")).await.unwrap();
        vote_all(&f.coordinator, session.id, &[("pat", 8)]).await;
        f.coordinator.reveal_session(session.id).await.unwrap();
        f.coordinator.finalize_session(session.id).await.unwrap();

        let burndown = f.coordinator.sprint_burndown(f.sprint.id).await.unwrap();
        assert_eq!(burndown.dates.len(), 10);
        assert_eq!(burndown.ideal[0], 8.0);
        assert_eq!(burndown.ideal[9], 0.0);
        assert_eq!(burndown.actual[0], Some(0));

        let err = f.coordinator.sprint_burndown(SprintId::new()).await.unwrap_err();
        assert!(matches!(err, EstimationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_custom_domain() {
        let f = fixture().await;
        let coordinator = SessionCoordinator::new(f.storage.clone(), f.hub.clone())
            .with_domain(PointDomain::new([1, 2, 4, 8], false).unwrap());
        let session = coordinator.start_session(f.item.id, who("pat")).await.unwrap();

        coordinator.submit_vote(session.id, who("pat"), Card::Points(4)).await.unwrap();
        let err = coordinator.submit_vote(session.id, who("pat"), Card::Unsure).await.unwrap_err();
        assert!(matches!(err, EstimationError::InvalidInput(_)));
        assert_eq!(coordinator.domain().values(), &[1, 2, 4, 8]);
    }
}
