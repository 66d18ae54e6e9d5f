//! Vote statistics.
//!
//! Means are rounded half-up with integer arithmetic, so `8.65` style
//! boundaries cannot drift through floating point.

use serde::{Deserialize, Serialize};
pub use sprintpoker_core::finalize_estimate;
use sprintpoker_core::{Card, Vote};

/// Display statistics over a vote set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoteStats {
    /// Votes cast, unsure included
    pub count: usize,
    /// Votes with a point value
    pub counted: usize,
    /// Unsure votes, excluded from the numbers below
    pub unsure: usize,
    /// Lowest point value, 0 when nothing counted
    pub min: u32,
    /// Highest point value, 0 when nothing counted
    pub max: u32,
    /// Mean rounded half-up to one decimal, 0 when nothing counted
    pub mean: f64,
}

impl VoteStats {
    /// Statistics over a list of cards.
    pub fn from_cards(cards: impl IntoIterator<Item = Card>) -> Self {
        let cards: Vec<Card> = cards.into_iter().collect();
        let values = numeric(cards.iter().copied());

        Self {
            count: cards.len(),
            counted: values.len(),
            unsure: cards.len() - values.len(),
            min: values.iter().copied().min().unwrap_or(0),
            max: values.iter().copied().max().unwrap_or(0),
            mean: display_mean(&values),
        }
    }

    /// Statistics over stored votes.
    pub fn from_votes(votes: &[Vote]) -> Self {
        Self::from_cards(votes.iter().map(|v| v.card))
    }
}

/// Point values of the numeric cards.
pub fn numeric(cards: impl IntoIterator<Item = Card>) -> Vec<u32> {
    cards.into_iter().filter_map(|c| c.points()).collect()
}

/// Mean rounded half-up to one decimal place.
pub fn display_mean(values: &[u32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let (sum, n) = sum_and_len(values);
    ((20 * sum + n) / (2 * n)) as f64 / 10.0
}

fn sum_and_len(values: &[u32]) -> (u64, u64) {
    (values.iter().map(|&v| v as u64).sum(), values.len() as u64)
}
