//! Conditional write rules shared by every backend.
//!
//! Callers hold their backend's write lock, load the rows involved, apply
//! one of these functions and persist whatever changed.

use sprintpoker_core::{
    estimate_votes, EstimationSession, SessionState, Time, Vote, WorkItem, WorkItemStatus,
};

use crate::trait_::{BeginOutcome, Conditional, Finalized, Result, StorageError};

/// Supersede the live sessions of `item` and mark it `voting`.
///
/// `existing` must yield the sessions of the same work item. The caller
/// inserts `session` when the outcome is `Started`.
pub(crate) fn begin<'a>(
    item: Option<&mut WorkItem>,
    existing: impl Iterator<Item = &'a mut EstimationSession>,
    session: &EstimationSession,
) -> BeginOutcome {
    let Some(item) = item else {
        return BeginOutcome::ItemMissing;
    };
    if item.status == WorkItemStatus::Completed {
        return BeginOutcome::ItemCompleted;
    }

    let mut superseded = Vec::new();
    for old in existing.filter(|s| s.is_active && s.id != session.id) {
        old.set_state(SessionState::Inactive, session.created_at);
        superseded.push(old.id);
    }

    item.status = WorkItemStatus::Voting;
    item.updated_at = session.created_at;

    BeginOutcome::Started { superseded }
}

/// `active` with at least one vote → `revealed`.
pub(crate) fn reveal(
    session: Option<&mut EstimationSession>,
    vote_count: usize,
    at: Time,
) -> Conditional<EstimationSession> {
    let Some(session) = session else {
        return Conditional::Missing;
    };
    if !session.state.can_transition_to(SessionState::Revealed) || vote_count == 0 {
        return Conditional::Conflict(session.clone());
    }
    session.set_state(SessionState::Revealed, at);
    Conditional::Applied(session.clone())
}

/// `active | revealed` → `active`. The caller discards the votes when applied.
pub(crate) fn reset(session: Option<&mut EstimationSession>, at: Time) -> Conditional<EstimationSession> {
    let Some(session) = session else {
        return Conditional::Missing;
    };
    if !session.state.is_live() {
        return Conditional::Conflict(session.clone());
    }
    session.set_state(SessionState::Active, at);
    Conditional::Applied(session.clone())
}

/// `revealed` → `finalized`, committing the estimate of `votes` to the
/// work item. `votes` must be the session's votes read under the same lock.
pub(crate) fn finalize(
    session: Option<&mut EstimationSession>,
    item: Option<&mut WorkItem>,
    votes: Vec<Vote>,
    at: Time,
) -> Result<Conditional<Finalized>> {
    let Some(session) = session else {
        return Ok(Conditional::Missing);
    };
    if !session.state.can_transition_to(SessionState::Finalized) {
        return Ok(Conditional::Conflict(session.clone()));
    }
    let Some(estimate) = estimate_votes(&votes) else {
        return Ok(Conditional::Conflict(session.clone()));
    };
    let Some(item) = item else {
        return Err(StorageError::NotFound(format!(
            "work item {} of session {}",
            session.work_item_id, session.id
        )));
    };

    session.set_state(SessionState::Finalized, at);
    session.estimate = Some(estimate);
    session.finalized_at = Some(at);

    item.story_points = Some(estimate);
    item.status = WorkItemStatus::Completed;
    item.completed_at = Some(at);
    item.updated_at = at;

    Ok(Conditional::Applied(Finalized {
        session: session.clone(),
        work_item: item.clone(),
        votes,
    }))
}

/// Insert or overwrite `vote` in `votes` while the session is `active`.
pub(crate) fn upsert(
    session: Option<&EstimationSession>,
    votes: &mut Vec<Vote>,
    vote: &Vote,
) -> Conditional<Vote> {
    let Some(session) = session else {
        return Conditional::Missing;
    };
    if session.state != SessionState::Active {
        return Conditional::Conflict(session.clone());
    }

    match votes
        .iter_mut()
        .find(|v| v.participant_id == vote.participant_id)
    {
        Some(existing) => {
            existing.card = vote.card;
            existing.updated_at = vote.updated_at;
            Conditional::Applied(existing.clone())
        }
        None => {
            votes.push(vote.clone());
            Conditional::Applied(vote.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprintpoker_core::{Card, ParticipantId, SprintId};

    fn item() -> WorkItem {
        WorkItem::new(SprintId::new(), "Login page", 1)
    }

    #[test]
    fn test_begin_supersedes_only_live_sessions() {
        let mut item = item();
        let mut live = EstimationSession::new(item.id, ParticipantId::new("a"));
        let mut finished = EstimationSession::new(item.id, ParticipantId::new("a"));
        finished.set_state(SessionState::Finalized, chrono::Utc::now());
        let fresh = EstimationSession::new(item.id, ParticipantId::new("b"));

        let outcome = begin(Some(&mut item), [&mut live, &mut finished].into_iter(), &fresh);

        assert_eq!(outcome, BeginOutcome::Started { superseded: vec![live.id] });
        assert_eq!(live.state, SessionState::Inactive);
        assert!(!live.is_active);
        assert_eq!(finished.state, SessionState::Finalized);
        assert_eq!(item.status, WorkItemStatus::Voting);
    }

    #[test]
    fn test_begin_refuses_completed_item() {
        let mut item = item();
        item.status = WorkItemStatus::Completed;
        let fresh = EstimationSession::new(item.id, ParticipantId::new("b"));
        let outcome = begin(Some(&mut item), std::iter::empty(), &fresh);
        assert_eq!(outcome, BeginOutcome::ItemCompleted);
    }

    #[test]
    fn test_reveal_requires_votes() {
        let mut session = EstimationSession::new(item().id, ParticipantId::new("a"));
        let now = chrono::Utc::now();
        assert!(matches!(reveal(Some(&mut session), 0, now), Conditional::Conflict(_)));
        assert!(reveal(Some(&mut session), 2, now).is_applied());
        assert_eq!(session.state, SessionState::Revealed);
        assert!(matches!(reveal(Some(&mut session), 2, now), Conditional::Conflict(_)));
    }

    #[test]
    fn test_upsert_overwrites_same_participant() {
        let session = EstimationSession::new(item().id, ParticipantId::new("a"));
        let mut votes = Vec::new();
        let first = Vote::new(session.id, ParticipantId::new("bob"), Card::Points(3));
        let second = Vote::new(session.id, ParticipantId::new("bob"), Card::Points(8));

        upsert(Some(&session), &mut votes, &first);
        let stored = upsert(Some(&session), &mut votes, &second);

        assert_eq!(votes.len(), 1);
        match stored {
            Conditional::Applied(v) => {
                assert_eq!(v.id, first.id);
                assert_eq!(v.card, Card::Points(8));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    fn votes(session: &EstimationSession, cards: &[Card]) -> Vec<Vote> {
        cards
            .iter()
            .enumerate()
            .map(|(i, card)| Vote::new(session.id, ParticipantId::new(format!("p{}", i)), *card))
            .collect()
    }

    #[test]
    fn test_finalize_needs_revealed() {
        let mut item = item();
        let mut session = EstimationSession::new(item.id, ParticipantId::new("a"));
        let now = chrono::Utc::now();
        let cast = votes(&session, &[Card::Points(5), Card::Points(8), Card::Points(13)]);

        let outcome = finalize(Some(&mut session), Some(&mut item), cast.clone(), now).unwrap();
        assert!(matches!(outcome, Conditional::Conflict(_)));
        assert_eq!(item.story_points, None);

        session.set_state(SessionState::Revealed, now);
        let outcome = finalize(Some(&mut session), Some(&mut item), cast, now).unwrap();
        assert!(outcome.is_applied());
        assert_eq!(item.story_points, Some(9));
        assert_eq!(item.status, WorkItemStatus::Completed);
        assert_eq!(session.estimate, Some(9));
        assert!(!session.is_active);
    }

    #[test]
    fn test_finalize_refuses_unsure_only() {
        let mut item = item();
        let mut session = EstimationSession::new(item.id, ParticipantId::new("a"));
        session.set_state(SessionState::Revealed, chrono::Utc::now());
        let cast = votes(&session, &[Card::Unsure, Card::Unsure]);

        let outcome = finalize(Some(&mut session), Some(&mut item), cast, chrono::Utc::now()).unwrap();
        assert!(matches!(outcome, Conditional::Conflict(s) if s.state == SessionState::Revealed));
        assert_eq!(item.status, WorkItemStatus::Pending);
    }
}
