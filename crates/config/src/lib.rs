//! Configuration for the robohub coordination server
//!
//! Supports loading configuration from:
//! - TOML/YAML files under `config/`
//! - Environment variables (`ROBOHUB__` prefix, `__` separator)

pub mod settings;

pub use settings::{
    load_settings, AudioConfig, DatabaseConfig, FleetConfig, ServerConfig, Settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
