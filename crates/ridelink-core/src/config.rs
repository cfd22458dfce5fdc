//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/ridelink/config.toml)
//! 3. Environment variables (RIDELINK_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::connection::BackoffPolicy;

/// Environment variable prefix
const ENV_PREFIX: &str = "RIDELINK";

/// Frame encoding used on the live channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// JSON text frames
    #[default]
    Json,
    /// CBOR binary frames
    Cbor,
}

/// Reconnection policy settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay unit multiplied by the attempt number
    pub base_delay_ms: u64,
    /// Upper bound on any single backoff delay
    pub max_delay_ms: u64,
    /// Failed attempts allowed before giving up
    pub max_attempts: u32,
    /// How long a single open attempt may take
    pub connect_timeout_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            max_attempts: 5,
            connect_timeout_secs: 10,
        }
    }
}

impl ReconnectConfig {
    /// Backoff policy described by these settings
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.max_attempts,
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Offline action queue settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of pending actions kept; oldest are dropped beyond it
    pub capacity: usize,
    /// Default retry budget for a queued action
    pub max_retries: u32,
    /// Interval of the background flush while online (0 disables it)
    pub flush_interval_secs: u64,
    /// Timeout for a single delivery attempt
    pub request_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            max_retries: 3,
            flush_interval_secs: 30,
            request_timeout_secs: 15,
        }
    }
}

impl QueueConfig {
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_secs > 0).then(|| Duration::from_secs(self.flush_interval_secs))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Offline cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub profile_ttl_secs: u64,
    pub recent_activity_ttl_secs: u64,
    pub contacts_ttl_secs: u64,
    /// TTL for payloads cached from inbound server events
    pub event_ttl_secs: u64,
    /// Inbound event names whose latest payload is kept in the cache
    pub cached_events: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            profile_ttl_secs: 24 * 60 * 60,
            recent_activity_ttl_secs: 60 * 60,
            contacts_ttl_secs: 12 * 60 * 60,
            event_ttl_secs: 5 * 60,
            cached_events: Vec::new(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (SQLite key-value store)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Live channel URL (ws:// or wss://)
    #[serde(default)]
    pub server_url: Option<String>,

    /// Base URL that queued action endpoints are resolved against
    #[serde(default)]
    pub api_url: Option<String>,

    /// Frame encoding on the live channel
    #[serde(default)]
    pub wire_format: WireFormat,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            server_url: None,
            api_url: None,
            wire_format: WireFormat::default(),
            reconnect: ReconnectConfig::default(),
            queue: QueueConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (RIDELINK_DATA_DIR, RIDELINK_SERVER_URL, ...)
    /// 2. Config file (~/.config/ridelink/config.toml or RIDELINK_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_SERVER_URL", ENV_PREFIX)) {
            self.server_url = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_API_URL", ENV_PREFIX)) {
            self.api_url = if val.is_empty() { None } else { Some(val) };
        }

        // Unparseable numbers are ignored rather than clobbering the file value
        if let Ok(val) = std::env::var(format!("{}_QUEUE_CAPACITY", ENV_PREFIX)) {
            if let Ok(capacity) = val.parse() {
                self.queue.capacity = capacity;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_MAX_RETRIES", ENV_PREFIX)) {
            if let Ok(retries) = val.parse() {
                self.queue.max_retries = retries;
            }
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with RIDELINK_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ridelink")
            .join("config.toml")
    }

    /// Get the path to the SQLite key-value store
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("ridelink.db")
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ridelink")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "RIDELINK_DATA_DIR",
        "RIDELINK_SERVER_URL",
        "RIDELINK_API_URL",
        "RIDELINK_QUEUE_CAPACITY",
        "RIDELINK_MAX_RETRIES",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.server_url.is_none());
        assert!(config.data_dir.ends_with("ridelink"));
        assert_eq!(config.queue.capacity, 50);
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.max_delay_ms, 10_000);
        assert_eq!(config.wire_format, WireFormat::Json);
    }

    #[test]
    fn test_file_paths() {
        let config = Config::default();
        assert!(config.sqlite_path().ends_with("ridelink.db"));
    }

    #[test]
    fn test_env_override_urls() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("RIDELINK_SERVER_URL", "ws://localhost:4000/live");
        env::set_var("RIDELINK_API_URL", "http://localhost:4000/api");
        config.apply_env_overrides();
        assert_eq!(
            config.server_url.as_deref(),
            Some("ws://localhost:4000/live")
        );
        assert_eq!(config.api_url.as_deref(), Some("http://localhost:4000/api"));

        // Empty string clears it
        env::set_var("RIDELINK_SERVER_URL", "");
        config.apply_env_overrides();
        assert!(config.server_url.is_none());
    }

    #[test]
    fn test_env_override_queue_limits() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("RIDELINK_QUEUE_CAPACITY", "10");
        env::set_var("RIDELINK_MAX_RETRIES", "not-a-number");
        config.apply_env_overrides();

        assert_eq!(config.queue.capacity, 10);
        assert_eq!(config.queue.max_retries, 3);
    }

    #[test]
    fn test_load_from_str_partial_sections() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            server_url = "wss://live.example.com"
            wire_format = "cbor"

            [reconnect]
            max_attempts = 8

            [cache]
            cached_events = ["ride-status"]
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.wire_format, WireFormat::Cbor);
        assert_eq!(config.reconnect.max_attempts, 8);
        // Unspecified fields keep their defaults
        assert_eq!(config.reconnect.base_delay_ms, 1_000);
        assert_eq!(config.cache.cached_events, vec!["ride-status".to_string()]);
        assert_eq!(config.queue, QueueConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config {
            data_dir: temp_dir.path().join("data"),
            ..Config::default()
        };
        config.api_url = Some("https://api.example.com".to_string());
        config.queue.flush_interval_secs = 0;
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.api_url, config.api_url);
        assert!(loaded.queue.flush_interval().is_none());
        assert!(loaded.data_dir.exists());
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        env::set_var("RIDELINK_DATA_DIR", temp_dir.path().join("data"));

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert!(config.server_url.is_none());
        assert_eq!(config.queue.capacity, 50);
    }
}
