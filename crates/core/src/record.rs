//! Persisted record types and lifecycle enums

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::frame::PayloadMap;

/// Command lifecycle status.
///
/// Transitions only move forward: `created -> sent -> {ack_success,
/// ack_error, timeout}` and `created -> no_targets`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Created,
    Sent,
    AckSuccess,
    AckError,
    Timeout,
    NoTargets,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Sent => "sent",
            Self::AckSuccess => "ack_success",
            Self::AckError => "ack_error",
            Self::Timeout => "timeout",
            Self::NoTargets => "no_targets",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "sent" => Some(Self::Sent),
            "ack_success" => Some(Self::AckSuccess),
            "ack_error" => Some(Self::AckError),
            "timeout" => Some(Self::Timeout),
            "no_targets" => Some(Self::NoTargets),
            _ => None,
        }
    }

    /// A terminal status accepts no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AckSuccess | Self::AckError | Self::Timeout | Self::NoTargets
        )
    }

    /// Whether moving to `next` respects the forward-only lifecycle.
    pub fn can_transition_to(&self, next: CommandStatus) -> bool {
        match self {
            Self::Created => matches!(
                next,
                Self::Sent | Self::NoTargets
            ),
            Self::Sent => matches!(next, Self::AckSuccess | Self::AckError | Self::Timeout),
            _ => false,
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection lifecycle event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionEventKind {
    Connected,
    Disconnected,
    Timeout,
    Reregistered,
}

impl ConnectionEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Timeout => "timeout",
            Self::Reregistered => "reregistered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "connected" => Some(Self::Connected),
            "disconnected" => Some(Self::Disconnected),
            "timeout" => Some(Self::Timeout),
            "reregistered" => Some(Self::Reregistered),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted device row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub device_type: String,
    pub is_online: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: PayloadMap,
}

/// Append-only telemetry snapshot row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub id: i64,
    pub device_id: String,
    pub device_type: String,
    #[serde(default)]
    pub payload: PayloadMap,
    pub timestamp: DateTime<Utc>,
}

/// Command lifecycle row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    pub command_id: String,
    pub device_type: String,
    pub command_name: String,
    #[serde(default)]
    pub payload: PayloadMap,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub response: Option<Value>,
    pub target_device_count: u32,
    pub success_count: u32,
}

/// Append-only connection event row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub id: i64,
    pub device_id: String,
    pub device_type: String,
    pub kind: ConnectionEventKind,
    pub timestamp: DateTime<Utc>,
    pub details: Option<Value>,
}

/// Append-only audio transcript row. One row per accepted upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioTranscript {
    pub id: i64,
    pub device_id: String,
    pub raw_text: String,
    pub normalized_text: String,
    pub prefix_ok: bool,
    pub command_name: Option<String>,
    pub confidence: f32,
    pub manual: bool,
    pub level: Option<i64>,
    pub threshold: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_forward_transitions() {
        use CommandStatus::*;
        assert!(Created.can_transition_to(Sent));
        assert!(Created.can_transition_to(NoTargets));
        assert!(Sent.can_transition_to(AckSuccess));
        assert!(Sent.can_transition_to(AckError));
        assert!(Sent.can_transition_to(Timeout));
    }

    #[test]
    fn test_status_never_regresses() {
        use CommandStatus::*;
        assert!(!Sent.can_transition_to(Created));
        assert!(!AckSuccess.can_transition_to(Sent));
        assert!(!Timeout.can_transition_to(AckSuccess));
        assert!(!NoTargets.can_transition_to(Sent));
        assert!(!Created.can_transition_to(Timeout));
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            CommandStatus::Created,
            CommandStatus::Sent,
            CommandStatus::AckSuccess,
            CommandStatus::AckError,
            CommandStatus::Timeout,
            CommandStatus::NoTargets,
        ] {
            assert_eq!(CommandStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CommandStatus::parse("pending"), None);
    }

    #[test]
    fn test_event_kind_round_trip() {
        for kind in [
            ConnectionEventKind::Connected,
            ConnectionEventKind::Disconnected,
            ConnectionEventKind::Timeout,
            ConnectionEventKind::Reregistered,
        ] {
            assert_eq!(ConnectionEventKind::parse(kind.as_str()), Some(kind));
        }
    }
}
