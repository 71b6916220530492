//! Device channel frames
//!
//! Every message on a device channel is a UTF-8 JSON object
//! discriminated by a `message_type` string. Payloads beyond the
//! discriminator and the per-kind required fields are open-ended maps
//! persisted verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Open-ended key/value payload carried by frames and records.
pub type PayloadMap = serde_json::Map<String, Value>;

/// Sample format tag for audio chunk frames.
pub const PCM_FORMAT: &str = "pcm_s16_le";

/// Ack outcome reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Success,
    Error,
}

impl AckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Inbound frame (device to server).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum DeviceFrame {
    /// First-frame expectation on connect; re-sent later it acts as a
    /// metadata refresh.
    Registration {
        device_type: String,
        #[serde(default)]
        metadata: PayloadMap,
    },
    /// Liveness ping; no payload beyond the type claim.
    Heartbeat { device_type: String },
    /// Telemetry snapshot.
    Status {
        device_type: String,
        #[serde(default)]
        payload: PayloadMap,
    },
    /// Completion report for a previously routed command.
    CommandAck {
        device_type: String,
        command_id: String,
        status: AckStatus,
        #[serde(default)]
        response: Option<Value>,
    },
}

impl DeviceFrame {
    /// The device type claimed by this frame.
    pub fn device_type(&self) -> &str {
        match self {
            Self::Registration { device_type, .. }
            | Self::Heartbeat { device_type }
            | Self::Status { device_type, .. }
            | Self::CommandAck { device_type, .. } => device_type,
        }
    }
}

/// Outbound frame (server to device).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Directed instruction, correlated by `command_id`.
    Command {
        command_id: String,
        command_name: String,
        payload: PayloadMap,
    },
    /// One slice of a synthesized audio reply. The final slice carries
    /// `is_last = true`.
    AudioChunk {
        audio_base64: String,
        is_last: bool,
        samplerate: u32,
        format: String,
        index: usize,
        total: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_round_trip() {
        let json = r#"{"message_type":"registration","device_type":"servo","metadata":{"fw":"1.2"}}"#;
        let frame: DeviceFrame = serde_json::from_str(json).unwrap();
        match &frame {
            DeviceFrame::Registration {
                device_type,
                metadata,
            } => {
                assert_eq!(device_type, "servo");
                assert_eq!(metadata.get("fw").unwrap(), "1.2");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        let back = serde_json::to_value(&frame).unwrap();
        assert_eq!(back["message_type"], "registration");
    }

    #[test]
    fn test_heartbeat_parses_without_extras() {
        let frame: DeviceFrame =
            serde_json::from_str(r#"{"message_type":"heartbeat","device_type":"wheel"}"#).unwrap();
        assert_eq!(frame.device_type(), "wheel");
    }

    #[test]
    fn test_command_ack_defaults_response() {
        let frame: DeviceFrame = serde_json::from_str(
            r#"{"message_type":"command_ack","device_type":"wheel","command_id":"c1","status":"success"}"#,
        )
        .unwrap();
        match frame {
            DeviceFrame::CommandAck {
                status, response, ..
            } => {
                assert_eq!(status, AckStatus::Success);
                assert!(response.is_none());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let result = serde_json::from_str::<DeviceFrame>(
            r#"{"message_type":"telepathy","device_type":"wheel"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_command_frame_shape() {
        let frame = ServerFrame::Command {
            command_id: "abc".into(),
            command_name: "forward".into(),
            payload: PayloadMap::new(),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["message_type"], "command");
        assert_eq!(value["command_name"], "forward");
    }
}
