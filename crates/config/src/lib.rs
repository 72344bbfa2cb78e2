//! Configuration management for the voice bridge
//!
//! Supports loading configuration from:
//! - TOML files (config/default.toml, config/{env}.toml)
//! - Environment variables (VOICE_BRIDGE_ prefix)
//!
//! All tunables are validated at load time; downstream components consume
//! already-validated values and never re-check them.

pub mod settings;

pub use settings::{
    load_settings, AudioConfig, CircuitBreakerConfig, ObservabilityConfig, RateLimitConfig,
    ReconnectConfig, RuntimeEnvironment, ServerConfig, Settings, UpstreamConfig, VadConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
