//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// HTTP/WebSocket listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Session, heartbeat and command routing configuration
    #[serde(default)]
    pub fleet: FleetConfig,

    /// Audio pipeline configuration
    #[serde(default)]
    pub audio: AudioConfig,

    /// Audit store configuration
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fleet.heartbeat_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "fleet.heartbeat_timeout_seconds".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.fleet.reaper_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "fleet.reaper_interval_seconds".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.fleet.outbound_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "fleet.outbound_queue_capacity".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.audio.confidence_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "audio.confidence_threshold".to_string(),
                message: "must be within [0.0, 1.0]".to_string(),
            });
        }
        if self.audio.prefix_phrases.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "audio.prefix_phrases".to_string(),
                message: "wake phrases must be non-empty".to_string(),
            });
        }
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-request deadline, bounds external-collaborator latency
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Enable permissive CORS for dashboard polling
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_request_timeout() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            cors_enabled: default_true(),
        }
    }
}

/// Fleet coordination configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Seconds without any inbound frame before a device is reaped
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_seconds: u64,

    /// Reaper tick interval
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_seconds: u64,

    /// Deadline for collecting command acknowledgements
    #[serde(default = "default_ack_timeout")]
    pub command_ack_timeout_seconds: u64,

    /// Per-session outbound queue depth
    #[serde(default = "default_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

fn default_heartbeat_timeout() -> u64 {
    90
}
fn default_reaper_interval() -> u64 {
    10
}
fn default_ack_timeout() -> u64 {
    30
}
fn default_queue_capacity() -> usize {
    64
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_seconds: default_heartbeat_timeout(),
            reaper_interval_seconds: default_reaper_interval(),
            command_ack_timeout_seconds: default_ack_timeout(),
            outbound_queue_capacity: default_queue_capacity(),
        }
    }
}

/// Audio pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// PCM sample rate expected on upload and produced on reply
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Wake phrases accepted by the prefix gate
    #[serde(default = "default_prefix_phrases")]
    pub prefix_phrases: Vec<String>,

    /// Minimum fuzzy-match confidence before a command is dispatched
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Audio reply chunk size in bytes (pre-base64)
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,

    /// Speech-to-text sidecar endpoint; unset disables transcription
    #[serde(default)]
    pub stt_url: Option<String>,

    /// Text-to-speech sidecar endpoint; unset disables audio replies
    #[serde(default)]
    pub tts_url: Option<String>,
}

fn default_sample_rate() -> u32 {
    16000
}
fn default_prefix_phrases() -> Vec<String> {
    vec!["ESP".to_string(), "NATIONAL PG".to_string()]
}
fn default_confidence_threshold() -> f32 {
    0.70
}
fn default_chunk_bytes() -> usize {
    2048
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            prefix_phrases: default_prefix_phrases(),
            confidence_threshold: default_confidence_threshold(),
            chunk_bytes: default_chunk_bytes(),
            stt_url: None,
            tts_url: None,
        }
    }
}

/// Audit store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file, one per process instance
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "robohub.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (`ROBOHUB__` prefix)
/// 2. `config/{env}` (if env specified)
/// 3. `config/default`
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("ROBOHUB")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
