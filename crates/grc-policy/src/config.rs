//! Engine configuration.
//!
//! Loaded from TOML; every section and field has a default.
//!
//! ```toml
//! [store]
//! path = "etc/policies/grc-baseline.yml"
//! watch = true
//! debounce = "500ms"
//!
//! [resolver]
//! cache_ttl = "5m"
//!
//! [audit]
//! file = "var/audit/policy.jsonl"
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable overriding `store.path`.
pub const ENV_POLICY_PATH: &str = "GRC_POLICY_PATH";
/// Environment variable overriding `store.watch`.
pub const ENV_POLICY_WATCH: &str = "GRC_POLICY_WATCH";
/// Environment variable overriding `logging.level`.
pub const ENV_LOG_LEVEL: &str = "GRC_POLICY_LOG_LEVEL";

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub resolver: ResolverConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
}

/// Policy store and hot-reload settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Location of the policy document.
    pub path: PathBuf,

    /// Watch the document for changes.
    pub watch: bool,

    /// Quiet period before a change triggers a reload.
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,

    /// How often the watcher drains file events.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Reload attempts per change before giving up.
    pub reload_retries: usize,

    /// Initial backoff between reload attempts. Doubles on each retry.
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,

    /// Capacity of the reload notification channel.
    pub notify_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("etc/policies/grc-baseline.yml"),
            watch: true,
            debounce: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
            reload_retries: 3,
            retry_backoff: Duration::from_millis(200),
            notify_capacity: 64,
        }
    }
}

impl StoreConfig {
    /// Store configuration for a given document path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Fast timings for tests.
    #[must_use]
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            watch: true,
            debounce: Duration::from_millis(50),
            poll_interval: Duration::from_millis(20),
            reload_retries: 2,
            retry_backoff: Duration::from_millis(20),
            notify_capacity: 16,
        }
    }
}

/// Path resolution cache settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverConfig {
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Audit trail settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Emit audit records.
    pub enabled: bool,

    /// Optional JSON-lines file receiving every audit record.
    pub file: Option<PathBuf>,

    /// Upper bound on a single sink write.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: None,
            write_timeout: Duration::from_secs(2),
        }
    }
}

/// Logging settings, consumed by binaries installing a subscriber.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Loads configuration from a TOML file, applies environment overrides
    /// and validates the result.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
            Self::from_toml(&content)?
        } else {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from the environment. `lookup` abstracts the
    /// environment so tests do not touch process state.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_POLICY_PATH) {
            self.store.path = PathBuf::from(path);
        }
        if let Some(watch) = lookup(ENV_POLICY_WATCH) {
            self.store.watch = match watch.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "{ENV_POLICY_WATCH} must be a boolean, got '{other}'"
                    )));
                }
            };
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - The policy path is empty
    /// - The debounce, poll interval or cache TTL is zero
    /// - The notification capacity is zero
    /// - The log level is unknown
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue(
                "store.path cannot be empty".to_string(),
            ));
        }
        if self.store.debounce.is_zero() {
            return Err(ConfigError::InvalidValue(
                "store.debounce must be > 0".to_string(),
            ));
        }
        if self.store.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "store.poll_interval must be > 0".to_string(),
            ));
        }
        if self.store.notify_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "store.notify_capacity must be > 0".to_string(),
            ));
        }
        if self.resolver.cache_ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "resolver.cache_ttl must be > 0".to_string(),
            ));
        }
        match self.logging.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "Invalid log level: '{other}'. Must be trace, debug, info, warn or error"
                )));
            }
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration: {0}")]
    Io(String),

    /// The configuration file is not valid TOML for this schema.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
