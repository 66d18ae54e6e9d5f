//! Vote model and the point domain cards are drawn from.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::id::{ParticipantId, SessionId, VoteId};
use crate::Time;

/// One participant's vote in one session.
///
/// Unique per `(session_id, participant_id)`; resubmission overwrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    /// Unique identifier
    pub id: VoteId,

    /// Session the vote belongs to
    pub session_id: SessionId,

    /// Who voted
    pub participant_id: ParticipantId,

    /// Chosen card
    pub card: Card,

    /// First submission
    pub created_at: Time,

    /// Last overwrite
    pub updated_at: Time,
}

impl Vote {
    /// Create a new vote.
    pub fn new(session_id: SessionId, participant_id: ParticipantId, card: Card) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: VoteId::new(),
            session_id,
            participant_id,
            card,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A planning-poker card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Card {
    /// A numeric estimate
    Points(u32),
    /// The "?" card; counts as a vote, never aggregated
    Unsure,
}

impl Card {
    /// Numeric value, if any.
    pub fn points(&self) -> Option<u32> {
        match self {
            Card::Points(p) => Some(*p),
            Card::Unsure => None,
        }
    }
}

impl std::fmt::Display for Card {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Card::Points(p) => write!(f, "{}", p),
            Card::Unsure => f.write_str("?"),
        }
    }
}

impl std::str::FromStr for Card {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "?" {
            return Ok(Card::Unsure);
        }
        s.parse::<u32>()
            .map(Card::Points)
            .map_err(|_| ValidationError::UnparsableCard(s.to_string()))
    }
}

/// Ordered set of cards participants may play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointDomain {
    values: Vec<u32>,
    allow_unsure: bool,
}

impl PointDomain {
    /// Build a domain from point values. Values are sorted and deduplicated.
    pub fn new(values: impl IntoIterator<Item = u32>, allow_unsure: bool) -> Result<Self, ValidationError> {
        let mut values: Vec<u32> = values.into_iter().collect();
        values.sort_unstable();
        values.dedup();
        if values.is_empty() {
            return Err(ValidationError::EmptyDomain);
        }
        Ok(Self { values, allow_unsure })
    }

    /// Numeric values in ascending order.
    pub fn values(&self) -> &[u32] {
        &self.values
    }

    /// Whether the "?" card is playable.
    pub fn allows_unsure(&self) -> bool {
        self.allow_unsure
    }

    /// Whether `card` may be played.
    pub fn contains(&self, card: Card) -> bool {
        match card {
            Card::Points(p) => self.values.binary_search(&p).is_ok(),
            Card::Unsure => self.allow_unsure,
        }
    }

    /// Reject cards outside the domain.
    pub fn validate(&self, card: Card) -> Result<(), ValidationError> {
        if self.contains(card) {
            Ok(())
        } else {
            Err(ValidationError::CardOutsideDomain { card: card.to_string() })
        }
    }

    /// All playable cards, numeric first.
    pub fn cards(&self) -> Vec<Card> {
        let mut cards: Vec<Card> = self.values.iter().copied().map(Card::Points).collect();
        if self.allow_unsure {
            cards.push(Card::Unsure);
        }
        cards
    }
}

/// Mean rounded half-up to an integer; the value committed on finalize.
///
/// Integer arithmetic keeps `.5` cases exact.
pub fn finalize_estimate(values: &[u32]) -> u32 {
    if values.is_empty() {
        return 0;
    }
    let sum: u64 = values.iter().map(|&v| v as u64).sum();
    let n = values.len() as u64;
    ((2 * sum + n) / (2 * n)) as u32
}

/// Estimate a vote set commits, or `None` when no card carries points.
pub fn estimate_votes(votes: &[Vote]) -> Option<u32> {
    let values: Vec<u32> = votes.iter().filter_map(|v| v.card.points()).collect();
    (!values.is_empty()).then(|| finalize_estimate(&values))
}

impl Default for PointDomain {
    fn default() -> Self {
        Self {
            values: vec![0, 1, 2, 3, 5, 8, 13, 21, 34],
            allow_unsure: true,
        }
    }
}
