//! Resume capability for collection runs
//!
//! Persists the last committed cursor of every collection with atomic writes
//! and file locking, so an interrupted run continues strictly above the
//! records it already delivered.

pub mod checkpoint;
pub mod state;
pub mod store;

pub use checkpoint::CollectionCheckpoint;
pub use state::{ResumeError, ResumeState, StateMetadata};
pub use store::{ResumeStore, STATE_FILE_NAME};
