//! Fleet coordination for robohub
//!
//! Owns the live picture of the fleet: the in-memory device registry,
//! the session channels keyed by device id, the command router with
//! acknowledgement correlation, the heartbeat reaper and the state
//! snapshot ingestor. The audit store follows this state, it never
//! drives it.

pub mod ingest;
pub mod reaper;
pub mod registry;
pub mod router;
pub mod sessions;

pub use ingest::SnapshotIngestor;
pub use reaper::HeartbeatReaper;
pub use registry::{Device, DeviceRegistry, OfflineReason};
pub use router::{CommandRouter, RouterError};
pub use sessions::{
    AcceptedSession, ReservedIdError, SendOutcome, Session, SessionManager, RESERVED_DEVICE_IDS,
};
