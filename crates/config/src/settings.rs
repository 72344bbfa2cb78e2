//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Runtime environment (development, staging, production)
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Audio format and buffering
    #[serde(default)]
    pub audio: AudioConfig,

    /// Speech-boundary detection and debouncing
    #[serde(default)]
    pub vad: VadConfig,

    /// Upstream realtime backend
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable CORS origin checks
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Maximum concurrent sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Idle session expiry in seconds
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,

    /// Interval of the expired-session sweep in seconds
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Largest accepted inbound binary frame in bytes
    #[serde(default = "default_max_packet_bytes")]
    pub max_packet_bytes: usize,

    /// Per-session message rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_sessions: default_max_sessions(),
            session_timeout_secs: default_session_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            max_packet_bytes: default_max_packet_bytes(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Fixed-window message rate limit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Messages allowed per window
    #[serde(default = "default_rate_limit_messages")]
    pub max_messages: u32,

    /// Window length in milliseconds
    #[serde(default = "default_rate_limit_window_ms")]
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_messages: default_rate_limit_messages(),
            window_ms: default_rate_limit_window_ms(),
        }
    }
}

/// Audio format and buffering
///
/// The pipeline assumes PCM16 mono end to end; these values describe it, they
/// do not select among codecs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Input sample rate from the client (Hz)
    #[serde(default = "default_input_rate")]
    pub sample_rate_hz: u32,

    /// Output sample rate from the upstream backend (Hz)
    #[serde(default = "default_output_rate")]
    pub output_sample_rate_hz: u32,

    /// Capacity of the per-session utterance buffer in bytes
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,

    /// Minimum buffered bytes before a response is requested
    #[serde(default = "default_min_commit_bytes")]
    pub min_commit_bytes: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: default_input_rate(),
            output_sample_rate_hz: default_output_rate(),
            max_buffer_bytes: default_max_buffer_bytes(),
            min_commit_bytes: default_min_commit_bytes(),
        }
    }
}

/// Speech-boundary detection parameters
///
/// The first three are forwarded to the upstream backend's server-side VAD in
/// the session setup message; the last two drive the local debouncer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// Upstream detection threshold (0.0 - 1.0)
    #[serde(default = "default_vad_threshold")]
    pub threshold: f32,

    /// Audio retained before detected speech onset (ms)
    #[serde(default = "default_prefix_padding_ms")]
    pub prefix_padding_ms: u32,

    /// Silence required before the upstream fires speech-stopped (ms)
    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u32,

    /// Local confirmation window before honoring a speech start (ms)
    #[serde(default = "default_confirmation_ms")]
    pub confirmation_ms: u64,

    /// Local cooldown after a speech end before a new start is honored (ms)
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: default_vad_threshold(),
            prefix_padding_ms: default_prefix_padding_ms(),
            silence_duration_ms: default_silence_duration_ms(),
            confirmation_ms: default_confirmation_ms(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

/// Upstream realtime backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// WebSocket endpoint of the realtime backend
    #[serde(default = "default_upstream_url")]
    pub url: String,

    /// Model requested from the backend
    #[serde(default = "default_upstream_model")]
    pub model: String,

    /// Voice for generated audio
    #[serde(default = "default_upstream_voice")]
    pub voice: String,

    /// API key; falls back to the OPENAI_API_KEY environment variable
    #[serde(default = "default_api_key")]
    pub api_key: Option<String>,

    /// Budget for a single connect attempt in milliseconds
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Circuit breaker over connection attempts
    #[serde(default)]
    pub breaker: CircuitBreakerConfig,

    /// Reconnection backoff
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            model: default_upstream_model(),
            voice: default_upstream_voice(),
            api_key: default_api_key(),
            connection_timeout_ms: default_connection_timeout_ms(),
            breaker: CircuitBreakerConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Cooldown before a half-open trial is admitted (ms)
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

/// Exponential reconnect backoff configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// First retry delay (ms)
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Multiplier applied per attempt
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,

    /// Delay ceiling (ms)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Uniform jitter applied as +/- this many milliseconds
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Attempts before reconnection is abandoned
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_max_sessions() -> usize {
    100
}

fn default_session_timeout_secs() -> u64 {
    3600
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

fn default_max_packet_bytes() -> usize {
    65536
}

fn default_rate_limit_messages() -> u32 {
    100
}

fn default_rate_limit_window_ms() -> u64 {
    1000
}

fn default_input_rate() -> u32 {
    16000
}

fn default_output_rate() -> u32 {
    24000
}

fn default_max_buffer_bytes() -> usize {
    1024 * 1024
}

fn default_min_commit_bytes() -> usize {
    // ~100ms of 16kHz mono PCM16
    3200
}

fn default_vad_threshold() -> f32 {
    0.5
}

fn default_prefix_padding_ms() -> u32 {
    300
}

fn default_silence_duration_ms() -> u32 {
    500
}

fn default_confirmation_ms() -> u64 {
    200
}

fn default_cooldown_ms() -> u64 {
    300
}

fn default_upstream_url() -> String {
    "wss://api.openai.com/v1/realtime".to_string()
}

fn default_upstream_model() -> String {
    "gpt-4o-realtime-preview".to_string()
}

fn default_upstream_voice() -> String {
    "alloy".to_string()
}

fn default_api_key() -> Option<String> {
    std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())
}

fn default_connection_timeout_ms() -> u64 {
    15_000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    60_000
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_audio()?;
        self.validate_vad()?;
        self.validate_upstream()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        let server = &self.server;

        if server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }

        if server.max_sessions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_sessions".to_string(),
                message: "Must allow at least 1 session".to_string(),
            });
        }

        if server.max_packet_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_packet_bytes".to_string(),
                message: "Must be at least 1 byte".to_string(),
            });
        }

        if server.rate_limit.max_messages == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.rate_limit.max_messages".to_string(),
                message: "Must allow at least 1 message per window".to_string(),
            });
        }

        if server.rate_limit.window_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.rate_limit.window_ms".to_string(),
                message: "Window must be at least 1ms".to_string(),
            });
        }

        if self.environment.is_production() && server.cors_enabled && server.cors_origins.is_empty()
        {
            tracing::warn!(
                "CORS is enabled in production but no origins are configured. \
                 This may block legitimate requests."
            );
        }

        Ok(())
    }

    fn validate_audio(&self) -> Result<(), ConfigError> {
        let audio = &self.audio;

        if audio.sample_rate_hz == 0 || audio.output_sample_rate_hz == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.sample_rate_hz".to_string(),
                message: "Sample rates must be nonzero".to_string(),
            });
        }

        if audio.max_buffer_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.max_buffer_bytes".to_string(),
                message: "Buffer capacity must be nonzero".to_string(),
            });
        }

        if audio.min_commit_bytes > audio.max_buffer_bytes {
            return Err(ConfigError::InvalidValue {
                field: "audio.min_commit_bytes".to_string(),
                message: format!(
                    "Cannot exceed max_buffer_bytes ({})",
                    audio.max_buffer_bytes
                ),
            });
        }

        if self.server.max_packet_bytes > audio.max_buffer_bytes {
            return Err(ConfigError::InvalidValue {
                field: "server.max_packet_bytes".to_string(),
                message: "A single packet cannot be larger than the utterance buffer".to_string(),
            });
        }

        Ok(())
    }

    fn validate_vad(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.vad.threshold) {
            return Err(ConfigError::InvalidValue {
                field: "vad.threshold".to_string(),
                message: format!("Must be between 0.0 and 1.0, got {}", self.vad.threshold),
            });
        }

        if self.vad.confirmation_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "vad.confirmation_ms".to_string(),
                message: "Confirmation window must be nonzero".to_string(),
            });
        }

        Ok(())
    }

    fn validate_upstream(&self) -> Result<(), ConfigError> {
        let upstream = &self.upstream;

        if !upstream.url.starts_with("ws://") && !upstream.url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue {
                field: "upstream.url".to_string(),
                message: format!("Must be a ws:// or wss:// URL, got {}", upstream.url),
            });
        }

        if upstream.connection_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "upstream.connection_timeout_ms".to_string(),
                message: "Connect timeout must be nonzero".to_string(),
            });
        }

        if upstream.breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "upstream.breaker.failure_threshold".to_string(),
                message: "Threshold must be at least 1".to_string(),
            });
        }

        if upstream.reconnect.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "upstream.reconnect.multiplier".to_string(),
                message: format!("Must be at least 1.0, got {}", upstream.reconnect.multiplier),
            });
        }

        if upstream.reconnect.initial_delay_ms > upstream.reconnect.max_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "upstream.reconnect.initial_delay_ms".to_string(),
                message: "Initial delay cannot exceed max delay".to_string(),
            });
        }

        Ok(())
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (VOICE_BRIDGE_ prefix)
/// 2. config/{env}.toml (if env specified)
/// 3. config/default.toml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICE_BRIDGE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.rate_limit.max_messages, 100);
        assert_eq!(settings.audio.min_commit_bytes, 3200);
        assert_eq!(settings.upstream.reconnect.max_attempts, 10);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_min_commit_cannot_exceed_capacity() {
        let mut settings = Settings::default();
        settings.audio.min_commit_bytes = settings.audio.max_buffer_bytes + 1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rate_limit_window_must_be_nonzero() {
        let mut settings = Settings::default();
        settings.server.rate_limit.window_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_upstream_url_scheme_is_checked() {
        let mut settings = Settings::default();
        settings.upstream.url = "https://api.openai.com/v1/realtime".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_backoff_multiplier_must_not_shrink() {
        let mut settings = Settings::default();
        settings.upstream.reconnect.multiplier = 0.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_deserialize_from_toml() {
        let raw = r#"
            environment = "production"

            [server]
            port = 9090
            cors_origins = ["https://app.example.com"]

            [server.rate_limit]
            max_messages = 50
            window_ms = 2000

            [upstream]
            url = "wss://realtime.example.com/v1"
        "#;
        let settings: Settings = toml::from_str(raw).unwrap();
        assert_eq!(settings.environment, RuntimeEnvironment::Production);
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.rate_limit.max_messages, 50);
        assert_eq!(settings.upstream.url, "wss://realtime.example.com/v1");
        // Unspecified sections keep their defaults.
        assert_eq!(settings.audio.sample_rate_hz, 16000);
    }
}
