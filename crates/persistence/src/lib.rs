//! SQLite persistence layer for robohub
//!
//! The audit store is a follower of the in-memory authoritative state:
//! it records devices, state snapshots, command lifecycles, connection
//! events and audio transcripts. Write failures are surfaced to the
//! caller but never roll back registry or session state.

pub mod error;
pub mod schema;
pub mod store;

pub use error::PersistenceError;
pub use store::{AuditStore, CommandUpdate, NewTranscript};
