//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Job lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Maximum processing attempts before a job is forced into `failed`
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Seconds a job may sit in `running` before it counts as stalled
    #[serde(default = "default_stalled_after_secs")]
    pub stalled_after_secs: u64,
    /// Seconds an idempotency key stays valid for deduplication
    #[serde(default = "default_idempotency_window_secs")]
    pub idempotency_window_secs: u64,
    /// Seconds the active backend configuration is cached before a lazy reload
    #[serde(default = "default_config_ttl_secs")]
    pub config_ttl_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_stalled_after_secs() -> u64 {
    300
}

fn default_idempotency_window_secs() -> u64 {
    600
}

fn default_config_ttl_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            stalled_after_secs: default_stalled_after_secs(),
            idempotency_window_secs: default_idempotency_window_secs(),
            config_ttl_secs: default_config_ttl_secs(),
        }
    }
}

/// Retry and fallback configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Base delay for exponential backoff in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single backoff delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Attempts per backend before fallback moves to the next candidate
    #[serde(default = "default_max_retries_per_backend")]
    pub max_retries_per_backend: u32,
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_retries_per_backend() -> u32 {
    2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries_per_backend: default_max_retries_per_backend(),
        }
    }
}

/// Status server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Bind address for the status HTTP server
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7979".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Per-backend configuration
///
/// A backend with `enabled = false` or no model name is treated as
/// unavailable by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// Whether the backend may be selected at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Model name sent to the backend (required for availability)
    #[serde(default)]
    pub model: Option<String>,
    /// API key for the backend
    #[serde(default)]
    pub api_key: Option<String>,
    /// Base URL overriding the backend's default endpoint
    #[serde(default)]
    pub base_url: Option<String>,
    /// Per-call timeout in seconds; higher-latency backends get larger values
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            model: None,
            api_key: None,
            base_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Keyed by backend id (e.g. "flux", "sdxl"); ordered for determinism
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - PIXELMILL_MAX_ATTEMPTS -> engine.max_attempts
    /// - PIXELMILL_STALLED_AFTER_SECS -> engine.stalled_after_secs
    /// - PIXELMILL_IDEMPOTENCY_WINDOW_SECS -> engine.idempotency_window_secs
    /// - PIXELMILL_CONFIG_TTL_SECS -> engine.config_ttl_secs
    /// - PIXELMILL_BASE_DELAY_MS -> retry.base_delay_ms
    /// - PIXELMILL_MAX_DELAY_MS -> retry.max_delay_ms
    /// - PIXELMILL_MAX_RETRIES_PER_BACKEND -> retry.max_retries_per_backend
    /// - PIXELMILL_BIND -> server.bind
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("PIXELMILL_MAX_ATTEMPTS") {
            if let Ok(attempts) = val.parse::<u32>() {
                self.engine.max_attempts = attempts;
            }
        }

        if let Ok(val) = env::var("PIXELMILL_STALLED_AFTER_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.engine.stalled_after_secs = secs;
            }
        }

        if let Ok(val) = env::var("PIXELMILL_IDEMPOTENCY_WINDOW_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.engine.idempotency_window_secs = secs;
            }
        }

        if let Ok(val) = env::var("PIXELMILL_CONFIG_TTL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.engine.config_ttl_secs = secs;
            }
        }

        if let Ok(val) = env::var("PIXELMILL_BASE_DELAY_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.retry.base_delay_ms = ms;
            }
        }

        if let Ok(val) = env::var("PIXELMILL_MAX_DELAY_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.retry.max_delay_ms = ms;
            }
        }

        if let Ok(val) = env::var("PIXELMILL_MAX_RETRIES_PER_BACKEND") {
            if let Ok(retries) = val.parse::<u32>() {
                self.retry.max_retries_per_backend = retries;
            }
        }

        if let Ok(val) = env::var("PIXELMILL_BIND") {
            if !val.is_empty() {
                self.server.bind = val;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}
