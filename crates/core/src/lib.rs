//! Core types for the robohub coordination server
//!
//! This crate provides the foundational types used across all other
//! crates:
//! - Device channel frames (wire protocol)
//! - Persisted record types and lifecycle enums

pub mod frame;
pub mod record;

pub use frame::{AckStatus, DeviceFrame, PayloadMap, ServerFrame, PCM_FORMAT};
pub use record::{
    AudioTranscript, CommandRecord, CommandStatus, ConnectionEvent, ConnectionEventKind,
    DeviceRecord, StateSnapshot,
};
