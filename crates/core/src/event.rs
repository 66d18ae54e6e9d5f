//! Change events - what subscribers of a session are told.

use crate::id::{SessionId, WorkItemId};
use crate::vote::Vote;
use crate::Time;
use serde::{Deserialize, Serialize};

/// A committed change to one estimation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Session the change belongs to
    pub session_id: SessionId,

    /// Per-session publish order, starting at 1
    pub sequence: u64,

    /// When it was published
    pub timestamp: Time,

    /// What changed
    pub kind: ChangeKind,
}

/// Kinds of session change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeKind {
    /// A new round opened for a work item
    SessionStarted {
        /// Item under estimation
        work_item_id: WorkItemId,
    },
    /// This round was replaced by a newer one
    Superseded {
        /// The replacing session
        by: SessionId,
    },
    /// A vote was created or overwritten
    VoteCast {
        /// The stored vote
        vote: Vote,
    },
    /// Votes became visible
    Revealed,
    /// Votes were discarded and voting reopened
    Reset,
    /// The estimate was committed
    Finalized {
        /// Committed point value
        estimate: u32,
    },
}

impl ChangeKind {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ChangeKind::SessionStarted { .. } => "session_started",
            ChangeKind::Superseded { .. } => "superseded",
            ChangeKind::VoteCast { .. } => "vote_cast",
            ChangeKind::Revealed => "revealed",
            ChangeKind::Reset => "reset",
            ChangeKind::Finalized { .. } => "finalized",
        }
    }

    /// Whether no further changes follow for the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChangeKind::Superseded { .. } | ChangeKind::Finalized { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_is_tagged() {
        let event = ChangeEvent {
            session_id: SessionId::new(),
            sequence: 3,
            timestamp: chrono::Utc::now(),
            kind: ChangeKind::Finalized { estimate: 8 },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"]["type"], "finalized");
        assert_eq!(json["kind"]["estimate"], 8);
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(ChangeKind::Finalized { estimate: 1 }.is_terminal());
        assert!(ChangeKind::Superseded { by: SessionId::new() }.is_terminal());
        assert!(!ChangeKind::Revealed.is_terminal());
    }
}
