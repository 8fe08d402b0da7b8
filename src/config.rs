use serde::{Deserialize, Serialize};
use tracing::{info, error};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Database URL
    pub db_url: Option<String>,

    /// Quiet period before a dirty room document is written to storage
    #[serde(default = "default_persist_debounce_ms")]
    pub persist_debounce_ms: u64,

    /// Maximum delay before a dirty room document is written, even under
    /// continuous editing
    #[serde(default = "default_persist_ceiling_ms")]
    pub persist_ceiling_ms: u64,

    /// Maximum persistence retry attempts before signalling degraded mode
    #[serde(default = "default_persist_max_retries")]
    pub persist_max_retries: u32,

    /// Base delay for persistence retry backoff
    #[serde(default = "default_persist_retry_base_ms")]
    pub persist_retry_base_ms: u64,

    /// Grace period an empty room is kept in memory before teardown
    #[serde(default = "default_room_grace_ms")]
    pub room_grace_ms: u64,

    /// Awareness entries with no update within this window are expired
    #[serde(default = "default_awareness_timeout_ms")]
    pub awareness_timeout_ms: u64,

    /// Coalescing window for local edits before they are pushed
    #[serde(default = "default_local_debounce_ms")]
    pub local_debounce_ms: u64,

    /// Coalescing window for remote changes before they are applied locally.
    /// Deliberately longer than the local window so local edits win races.
    #[serde(default = "default_remote_debounce_ms")]
    pub remote_debounce_ms: u64,

    /// Window after the last local edit during which remote application is
    /// suppressed
    #[serde(default = "default_editing_window_ms")]
    pub editing_window_ms: u64,

    /// Retry delay while the local view is not ready to accept a remote apply
    #[serde(default = "default_readiness_retry_ms")]
    pub readiness_retry_ms: u64,

    /// Maximum readiness retries before the apply is surfaced as an error
    #[serde(default = "default_readiness_max_retries")]
    pub readiness_max_retries: u32,

    /// Reconnect backoff floor
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    /// Reconnect backoff ceiling
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        // Load from environment variables using envy
        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "prod" || self.environment.to_lowercase() == "production"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            service_name: default_service_name(),
            db_url: None,
            persist_debounce_ms: default_persist_debounce_ms(),
            persist_ceiling_ms: default_persist_ceiling_ms(),
            persist_max_retries: default_persist_max_retries(),
            persist_retry_base_ms: default_persist_retry_base_ms(),
            room_grace_ms: default_room_grace_ms(),
            awareness_timeout_ms: default_awareness_timeout_ms(),
            local_debounce_ms: default_local_debounce_ms(),
            remote_debounce_ms: default_remote_debounce_ms(),
            editing_window_ms: default_editing_window_ms(),
            readiness_retry_ms: default_readiness_retry_ms(),
            readiness_max_retries: default_readiness_max_retries(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "diagramsync".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_persist_debounce_ms() -> u64 {
    5_000
}

fn default_persist_ceiling_ms() -> u64 {
    60_000
}

fn default_persist_max_retries() -> u32 {
    5
}

fn default_persist_retry_base_ms() -> u64 {
    500
}

fn default_room_grace_ms() -> u64 {
    30_000
}

fn default_awareness_timeout_ms() -> u64 {
    30_000
}

fn default_local_debounce_ms() -> u64 {
    100
}

fn default_remote_debounce_ms() -> u64 {
    1_000
}

fn default_editing_window_ms() -> u64 {
    3_000
}

fn default_readiness_retry_ms() -> u64 {
    250
}

fn default_readiness_max_retries() -> u32 {
    10
}

fn default_reconnect_base_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    15_000
}
