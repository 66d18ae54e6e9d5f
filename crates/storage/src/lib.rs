//! Storage abstraction and implementations for SprintPoker.
//!
//! This crate provides a trait-based storage interface with an in-memory
//! backend, a JSON file backend and an optional SQLite backend.

#![warn(missing_docs)]

pub mod trait_;
mod conditional;
pub mod memory_storage;
#[cfg(feature = "json")]
pub mod json_storage;
#[cfg(feature = "sqlite")]
pub mod sqlite_storage;

pub use trait_::{BeginOutcome, Conditional, Finalized, Result, Storage, StorageError};
pub use memory_storage::MemoryStorage;
#[cfg(feature = "json")]
pub use json_storage::JsonStorage;
#[cfg(feature = "sqlite")]
pub use sqlite_storage::SqliteStorage;
