//! Planning poker estimation: vote statistics and the session coordinator.

#![warn(missing_docs)]

pub mod aggregate;
pub mod coordinator;
pub mod error;
mod locks;

pub use aggregate::{display_mean, finalize_estimate, VoteStats};
pub use coordinator::{EstimationService, Finalization, SessionCoordinator, SessionView};
pub use error::{EstimationError, Result};
