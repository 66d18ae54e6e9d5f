//! Validation errors raised while constructing model values.

use chrono::NaiveDate;

/// A value supplied by a caller falls outside what the model accepts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Sprint start date lies after its end date
    #[error("sprint starts on {start} but ends on {end}")]
    DateRange {
        /// Requested start date
        start: NaiveDate,
        /// Requested end date
        end: NaiveDate,
    },

    /// Vote value is not part of the point domain
    #[error("card {card} is not in the point domain")]
    CardOutsideDomain {
        /// Rendered card value
        card: String,
    },

    /// Point domain has no values
    #[error("point domain must contain at least one value")]
    EmptyDomain,

    /// A card string could not be parsed
    #[error("cannot parse card '{0}'")]
    UnparsableCard(String),

    /// Generic field constraint
    #[error("{field}: {message}")]
    Field {
        /// Offending field
        field: &'static str,
        /// Human readable reason
        message: String,
    },
}
