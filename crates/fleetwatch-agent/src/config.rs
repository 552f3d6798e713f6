//! Configuration system for the fleetwatch agent
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//! - Validation
//!
//! This is the static, operator-owned configuration. The server-pushed settings
//! live in [`crate::runtime::RuntimeConfig`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Process settings
    pub agent: AgentSettings,

    /// Collection service settings
    pub server: ServerSettings,

    /// Retry and scheduling intervals
    pub timing: TimingSettings,

    /// Lifecycle recovery policy
    pub lifecycle: LifecycleSettings,

    /// Durable queue settings
    pub queue: QueueSettings,
}

/// Process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,

    /// Directory for the identity, lifecycle and queue files
    pub data_dir: PathBuf,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            data_dir: default_data_dir(),
        }
    }
}

/// Collection service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Base URL of the collection service
    pub url: String,

    /// Secret shared with the service, used to derive the device credential
    pub shared_secret: String,

    /// Timeout for report and delete requests
    pub http_timeout_secs: u64,

    /// Timeout for registration requests
    pub register_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8045".to_string(),
            shared_secret: String::new(),
            http_timeout_secs: 30,
            register_timeout_secs: 30,
        }
    }
}

impl ServerSettings {
    fn base(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// Registration endpoint
    pub fn register_url(&self) -> String {
        format!("{}/api/agent/register", self.base())
    }

    /// Default report endpoint, used until the server assigns one
    pub fn report_url(&self) -> String {
        format!("{}/api/agent/report", self.base())
    }

    /// Voluntary deletion endpoint
    pub fn delete_url(&self) -> String {
        format!("{}/api/agent/delete", self.base())
    }

    /// Get HTTP timeout as Duration
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Get registration timeout as Duration
    pub fn register_timeout(&self) -> Duration {
        Duration::from_secs(self.register_timeout_secs)
    }
}

/// Retry and scheduling intervals, all in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Report interval used until the server pushes one
    pub default_report_interval_secs: u64,

    /// Wait after a pending response or a failed registration
    pub register_retry_secs: u64,

    /// Wait after the server rejected the registration
    pub register_rejected_retry_secs: u64,

    /// Poll interval while waiting for error auto-recovery
    pub error_state_retry_secs: u64,

    /// Wait after registration reported monitoring inactive
    pub server_inactive_retry_secs: u64,

    /// Wait after an accepted registration left the config incomplete
    pub config_incomplete_retry_secs: u64,

    /// Queue records older than this are pruned
    pub cache_max_age_secs: u64,

    /// Force a minimal heartbeat after this long without successful communication
    pub silence_threshold_secs: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            default_report_interval_secs: 30,
            register_retry_secs: 30,
            register_rejected_retry_secs: 30 * 60,
            error_state_retry_secs: 5,
            server_inactive_retry_secs: 60,
            config_incomplete_retry_secs: 30,
            cache_max_age_secs: 24 * 60 * 60,
            silence_threshold_secs: 300,
        }
    }
}

/// Lifecycle recovery policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// Reset a persisted ERROR state to UNREGISTERED on startup
    pub auto_reset_error_on_startup: bool,

    /// Reset a persisted REGISTERING state to UNREGISTERED on startup
    pub auto_reset_registering_on_startup: bool,

    /// Leave ERROR once it has lasted this long
    pub error_recovery_after_secs: u64,

    /// Leave ERROR once this many failures were recorded inside it
    pub max_error_retries: u32,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            auto_reset_error_on_startup: true,
            auto_reset_registering_on_startup: true,
            error_recovery_after_secs: 300,
            max_error_retries: 10,
        }
    }
}

/// Durable queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Maximum records posted in one batch
    pub batch_size: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self { batch_size: 20 }
    }
}

impl AgentConfig {
    /// Path of the persisted device identifier
    pub fn identity_path(&self) -> PathBuf {
        self.agent.data_dir.join("device_id")
    }

    /// Path of the persisted lifecycle record
    pub fn lifecycle_path(&self) -> PathBuf {
        self.agent.data_dir.join("lifecycle.json")
    }

    /// Path of the durable queue database
    pub fn queue_path(&self) -> PathBuf {
        self.agent.data_dir.join("queue.db")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("fleetwatch"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/fleetwatch"))
}

/// Configuration loader with file discovery and env overrides
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Path to config file (if specified via CLI)
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. FLEETWATCH_CONFIG environment variable
    /// 3. ~/.config/fleetwatch/config.toml
    /// 4. /etc/fleetwatch/config.toml
    /// 5. Default values
    pub fn load(&self) -> ConfigResult<AgentConfig> {
        let mut config = match self.find_config_file() {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)?
            }
            None => {
                debug!("No config file found, using defaults");
                AgentConfig::default()
            }
        };

        Self::apply_env_overrides(&mut config);
        Self::validate(&config)?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!("CLI config path does not exist: {}", path.display());
        }

        if let Ok(env_path) = std::env::var("FLEETWATCH_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            warn!("FLEETWATCH_CONFIG path does not exist: {}", env_path);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let path = config_dir.join("fleetwatch").join("config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        #[cfg(unix)]
        {
            let path = PathBuf::from("/etc/fleetwatch/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> ConfigResult<AgentConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: AgentConfig = toml::from_str(&content)?;
        Ok(config)
    }

    fn apply_env_overrides(config: &mut AgentConfig) {
        if let Ok(val) = std::env::var("FLEETWATCH_LOG_LEVEL") {
            config.agent.log_level = val;
        }
        if let Ok(val) = std::env::var("FLEETWATCH_DATA_DIR") {
            config.agent.data_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("FLEETWATCH_SERVER_URL") {
            config.server.url = val;
        }
        if let Ok(val) = std::env::var("FLEETWATCH_SHARED_SECRET") {
            config.server.shared_secret = val;
        }
        if let Ok(val) = std::env::var("FLEETWATCH_BATCH_SIZE") {
            if let Ok(size) = val.parse() {
                config.queue.batch_size = size;
            }
        }
    }

    /// Validate configuration
    pub fn validate(config: &AgentConfig) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.agent.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                config.agent.log_level, valid_levels
            )));
        }

        url::Url::parse(&config.server.url).map_err(|e| {
            ConfigError::ValidationError(format!("Invalid server url {}: {}", config.server.url, e))
        })?;

        if config.server.http_timeout_secs == 0 || config.server.register_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "HTTP timeouts must be greater than 0".to_string(),
            ));
        }

        if config.timing.default_report_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "default_report_interval_secs must be greater than 0".to_string(),
            ));
        }

        if config.timing.cache_max_age_secs <= config.timing.default_report_interval_secs {
            warn!(
                "cache_max_age_secs ({}) is not larger than the report interval ({})",
                config.timing.cache_max_age_secs, config.timing.default_report_interval_secs
            );
        }

        if config.queue.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "queue.batch_size must be greater than 0".to_string(),
            ));
        }

        if config.server.shared_secret.is_empty() {
            warn!("No shared secret configured; registration will fail credential validation");
        }

        Ok(())
    }
}
