//! Estimation session model - one voting round for one work item.

use serde::{Deserialize, Serialize};

use crate::id::{ParticipantId, SessionId, WorkItemId};
use crate::Time;

/// One planning-poker round for exactly one work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationSession {
    /// Unique identifier
    pub id: SessionId,

    /// Work item being estimated
    pub work_item_id: WorkItemId,

    /// Participant who started the round
    pub started_by: ParticipantId,

    /// Lifecycle state
    pub state: SessionState,

    /// True while the session is the current round for its work item
    pub is_active: bool,

    /// Committed estimate once finalized
    pub estimate: Option<u32>,

    /// Creation timestamp
    pub created_at: Time,

    /// Last state change
    pub updated_at: Time,

    /// When the estimate was committed
    pub finalized_at: Option<Time>,
}

impl EstimationSession {
    /// Create a fresh session in state `Active`.
    pub fn new(work_item_id: WorkItemId, started_by: ParticipantId) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: SessionId::new(),
            work_item_id,
            started_by,
            state: SessionState::Active,
            is_active: true,
            estimate: None,
            created_at: now,
            updated_at: now,
            finalized_at: None,
        }
    }

    /// Move to `state`, keeping `is_active` consistent with it.
    pub fn set_state(&mut self, state: SessionState, at: Time) {
        self.state = state;
        self.is_active = state.is_live();
        self.updated_at = at;
    }
}

/// Session lifecycle.
///
/// ```text
/// Inactive → Active → Revealed → Finalized
///              ↑__________|  (reset)
/// ```
///
/// `Inactive` is only persisted for rounds superseded by a newer `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Superseded or not yet started
    Inactive,
    /// Accepting votes
    Active,
    /// Votes visible, no more submissions
    Revealed,
    /// Estimate committed to the work item
    Finalized,
}

impl SessionState {
    /// Whether the session is the current round for its work item.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Active | SessionState::Revealed)
    }

    /// Whether `self → next` is a legal transition.
    ///
    /// States advance one step at a time; `reset` may return a live
    /// session to `Active`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Inactive, Active)
                | (Active, Revealed)
                | (Revealed, Finalized)
                | (Active, Active)
                | (Revealed, Active)
                | (Active, Inactive)
                | (Revealed, Inactive)
        )
    }

    /// Operations callers may invoke in this state.
    pub fn allowed_operations(&self) -> &'static [&'static str] {
        match self {
            SessionState::Inactive => &[],
            SessionState::Active => &["submit_vote", "reveal", "reset"],
            SessionState::Revealed => &["reveal", "finalize", "reset"],
            SessionState::Finalized => &[],
        }
    }

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Inactive => "inactive",
            SessionState::Active => "active",
            SessionState::Revealed => "revealed",
            SessionState::Finalized => "finalized",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(SessionState::Inactive),
            "active" => Ok(SessionState::Active),
            "revealed" => Ok(SessionState::Revealed),
            "finalized" => Ok(SessionState::Finalized),
            other => Err(format!("unknown session state '{}'", other)),
        }
    }
}
