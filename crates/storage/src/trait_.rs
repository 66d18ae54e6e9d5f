//! Storage trait abstraction.

use async_trait::async_trait;
use sprintpoker_core::{
    DailySnapshot, EstimationSession, ParticipantId, ProjectId, SessionId, Sprint, SprintId,
    Time, Vote, WorkItem, WorkItemId,
};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored data could not be interpreted
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

/// Outcome of an atomic conditional write on a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Conditional<T> {
    /// The precondition held and the write was applied
    Applied(T),
    /// The session exists but was not in the required state
    Conflict(EstimationSession),
    /// The session does not exist
    Missing,
}

impl<T> Conditional<T> {
    /// Whether the write was applied.
    pub fn is_applied(&self) -> bool {
        matches!(self, Conditional::Applied(_))
    }
}

/// Outcome of [`Storage::begin_session`].
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// The new session was stored; these sessions were superseded
    Started {
        /// Previously active sessions for the work item
        superseded: Vec<SessionId>,
    },
    /// The work item has already been estimated
    ItemCompleted,
    /// The work item does not exist
    ItemMissing,
}

/// Result of a successful finalize: both rows as written.
#[derive(Debug, Clone, PartialEq)]
pub struct Finalized {
    /// The session, now `Finalized`
    pub session: EstimationSession,
    /// The work item, now `Completed` with its estimate
    pub work_item: WorkItem,
    /// The votes the estimate was computed from
    pub votes: Vec<Vote>,
}

/// Storage abstraction for SprintPoker data.
///
/// Receivers are `&self` so a single store can be shared by many concurrent
/// participants behind an `Arc`. The conditional session operations are each
/// applied as one indivisible step: concurrent callers observe either the
/// state before or the state after, never a mix.
#[async_trait]
pub trait Storage: Send + Sync {
    // === Sprint operations ===

    /// Save a sprint (create or update).
    async fn save_sprint(&self, sprint: &Sprint) -> Result<()>;

    /// Load a sprint by ID.
    async fn load_sprint(&self, id: SprintId) -> Result<Option<Sprint>>;

    /// List the sprints of a project, oldest start date first.
    async fn list_sprints(&self, project_id: ProjectId) -> Result<Vec<Sprint>>;

    /// Delete a sprint together with its work items, sessions, votes and snapshots.
    async fn delete_sprint(&self, id: SprintId) -> Result<()>;

    // === Work item operations ===

    /// Save a work item (create or update).
    async fn save_work_item(&self, item: &WorkItem) -> Result<()>;

    /// Load a work item by ID.
    async fn load_work_item(&self, id: WorkItemId) -> Result<Option<WorkItem>>;

    /// List the work items of a sprint ordered by position.
    async fn list_work_items(&self, sprint_id: SprintId) -> Result<Vec<WorkItem>>;

    /// Delete a work item together with its sessions and votes.
    async fn delete_work_item(&self, id: WorkItemId) -> Result<()>;

    // === Session operations ===

    /// Load a session by ID.
    async fn load_session(&self, id: SessionId) -> Result<Option<EstimationSession>>;

    /// List every session ever started for a work item, oldest first.
    async fn list_sessions(&self, work_item_id: WorkItemId) -> Result<Vec<EstimationSession>>;

    /// Store a new session for its work item.
    ///
    /// Applied only if the work item exists and is not completed. Every
    /// active session of the item is superseded and the item moves to
    /// `voting` in the same step.
    async fn begin_session(&self, session: &EstimationSession) -> Result<BeginOutcome>;

    /// Transition `active → revealed`, only if at least one vote exists.
    async fn reveal_session(&self, id: SessionId, at: Time) -> Result<Conditional<EstimationSession>>;

    /// Transition `active | revealed → active`, discarding every vote.
    async fn reset_session(&self, id: SessionId, at: Time) -> Result<Conditional<EstimationSession>>;

    /// Transition `revealed → finalized` and commit the rounded mean of the
    /// session's numeric votes to the work item.
    ///
    /// The votes are read inside the same step, so the estimate always
    /// matches the vote set the transition saw. A revealed session without
    /// any numeric vote is reported as `Conflict`.
    async fn finalize_session(&self, id: SessionId, at: Time) -> Result<Conditional<Finalized>>;

    // === Vote operations ===

    /// Insert or overwrite the vote keyed by `(session, participant)`,
    /// only while the session is `active`.
    ///
    /// An overwrite keeps the original vote id and `created_at`.
    async fn upsert_vote(&self, vote: &Vote) -> Result<Conditional<Vote>>;

    /// Load one participant's vote.
    async fn load_vote(&self, session_id: SessionId, participant_id: &ParticipantId) -> Result<Option<Vote>>;

    /// List the votes of a session, oldest first.
    async fn list_votes(&self, session_id: SessionId) -> Result<Vec<Vote>>;

    // === Snapshot operations ===

    /// Insert or overwrite the snapshot keyed by `(sprint, date)`.
    async fn save_snapshot(&self, snapshot: &DailySnapshot) -> Result<()>;

    /// List the snapshots of a sprint ordered by date.
    async fn list_snapshots(&self, sprint_id: SprintId) -> Result<Vec<DailySnapshot>>;
}
