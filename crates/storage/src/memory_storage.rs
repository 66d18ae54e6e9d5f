//! In-process storage backend.
//!
//! Keeps every table in memory behind one `RwLock`. Writers take the lock
//! exclusively, which makes each conditional operation atomic.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use sprintpoker_core::{
    DailySnapshot, EstimationSession, ParticipantId, ProjectId, SessionId, Sprint, SprintId,
    Time, Vote, WorkItem, WorkItemId,
};
use tokio::sync::RwLock;

use crate::conditional;
use crate::trait_::{BeginOutcome, Conditional, Finalized, Result, Storage};

#[derive(Default)]
struct Tables {
    sprints: HashMap<SprintId, Sprint>,
    work_items: HashMap<WorkItemId, WorkItem>,
    sessions: HashMap<SessionId, EstimationSession>,
    votes: HashMap<SessionId, Vec<Vote>>,
    snapshots: HashMap<SprintId, BTreeMap<NaiveDate, DailySnapshot>>,
}

impl Tables {
    fn remove_sessions_of(&mut self, work_item_id: WorkItemId) {
        let doomed: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.work_item_id == work_item_id)
            .map(|s| s.id)
            .collect();
        for id in doomed {
            self.sessions.remove(&id);
            self.votes.remove(&id);
        }
    }
}

/// Storage kept entirely in process memory.
#[derive(Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_sprint(&self, sprint: &Sprint) -> Result<()> {
        self.tables.write().await.sprints.insert(sprint.id, sprint.clone());
        Ok(())
    }

    async fn load_sprint(&self, id: SprintId) -> Result<Option<Sprint>> {
        Ok(self.tables.read().await.sprints.get(&id).cloned())
    }

    async fn list_sprints(&self, project_id: ProjectId) -> Result<Vec<Sprint>> {
        let tables = self.tables.read().await;
        let mut sprints: Vec<Sprint> = tables
            .sprints
            .values()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect();
        sprints.sort_by_key(|s| (s.start_date, s.created_at));
        Ok(sprints)
    }

    async fn delete_sprint(&self, id: SprintId) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.sprints.remove(&id);
        tables.snapshots.remove(&id);
        let items: Vec<WorkItemId> = tables
            .work_items
            .values()
            .filter(|i| i.sprint_id == id)
            .map(|i| i.id)
            .collect();
        for item_id in items {
            tables.work_items.remove(&item_id);
            tables.remove_sessions_of(item_id);
        }
        Ok(())
    }

    async fn save_work_item(&self, item: &WorkItem) -> Result<()> {
        self.tables.write().await.work_items.insert(item.id, item.clone());
        Ok(())
    }

    async fn load_work_item(&self, id: WorkItemId) -> Result<Option<WorkItem>> {
        Ok(self.tables.read().await.work_items.get(&id).cloned())
    }

    async fn list_work_items(&self, sprint_id: SprintId) -> Result<Vec<WorkItem>> {
        let tables = self.tables.read().await;
        let mut items: Vec<WorkItem> = tables
            .work_items
            .values()
            .filter(|i| i.sprint_id == sprint_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| (i.position, i.created_at));
        Ok(items)
    }

    async fn delete_work_item(&self, id: WorkItemId) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.work_items.remove(&id);
        tables.remove_sessions_of(id);
        Ok(())
    }

    async fn load_session(&self, id: SessionId) -> Result<Option<EstimationSession>> {
        Ok(self.tables.read().await.sessions.get(&id).cloned())
    }

    async fn list_sessions(&self, work_item_id: WorkItemId) -> Result<Vec<EstimationSession>> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<EstimationSession> = tables
            .sessions
            .values()
            .filter(|s| s.work_item_id == work_item_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| (s.created_at, s.id));
        Ok(sessions)
    }

    async fn begin_session(&self, session: &EstimationSession) -> Result<BeginOutcome> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let outcome = conditional::begin(
            tables.work_items.get_mut(&session.work_item_id),
            tables
                .sessions
                .values_mut()
                .filter(|s| s.work_item_id == session.work_item_id),
            session,
        );
        if matches!(outcome, BeginOutcome::Started { .. }) {
            tables.sessions.insert(session.id, session.clone());
        }
        Ok(outcome)
    }

    async fn reveal_session(&self, id: SessionId, at: Time) -> Result<Conditional<EstimationSession>> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let vote_count = tables.votes.get(&id).map_or(0, Vec::len);
        Ok(conditional::reveal(tables.sessions.get_mut(&id), vote_count, at))
    }

    async fn reset_session(&self, id: SessionId, at: Time) -> Result<Conditional<EstimationSession>> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let outcome = conditional::reset(tables.sessions.get_mut(&id), at);
        if outcome.is_applied() {
            tables.votes.remove(&id);
        }
        Ok(outcome)
    }

    async fn finalize_session(&self, id: SessionId, at: Time) -> Result<Conditional<Finalized>> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let votes = tables.votes.get(&id).cloned().unwrap_or_default();
        let session = tables.sessions.get_mut(&id);
        let item = match &session {
            Some(s) => tables.work_items.get_mut(&s.work_item_id),
            None => None,
        };
        conditional::finalize(session, item, votes, at)
    }

    async fn upsert_vote(&self, vote: &Vote) -> Result<Conditional<Vote>> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let Some(session) = tables.sessions.get(&vote.session_id) else {
            return Ok(Conditional::Missing);
        };
        let votes = tables.votes.entry(vote.session_id).or_default();
        Ok(conditional::upsert(Some(session), votes, vote))
    }

    async fn load_vote(&self, session_id: SessionId, participant_id: &ParticipantId) -> Result<Option<Vote>> {
        let tables = self.tables.read().await;
        Ok(tables
            .votes
            .get(&session_id)
            .and_then(|votes| votes.iter().find(|v| &v.participant_id == participant_id))
            .cloned())
    }

    async fn list_votes(&self, session_id: SessionId) -> Result<Vec<Vote>> {
        let tables = self.tables.read().await;
        Ok(tables.votes.get(&session_id).cloned().unwrap_or_default())
    }

    async fn save_snapshot(&self, snapshot: &DailySnapshot) -> Result<()> {
        let mut tables = self.tables.write().await;
        let rows = tables.snapshots.entry(snapshot.sprint_id).or_default();
        let mut row = snapshot.clone();
        if let Some(existing) = rows.get(&snapshot.date) {
            row.id = existing.id;
        }
        rows.insert(snapshot.date, row);
        Ok(())
    }

    async fn list_snapshots(&self, sprint_id: SprintId) -> Result<Vec<DailySnapshot>> {
        let tables = self.tables.read().await;
        Ok(tables
            .snapshots
            .get(&sprint_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }
}
