//! Pool tuning and reader/writer settings
//!
//! Values come from, in increasing priority: defaults, a TOML settings file,
//! environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const READER_CONN_STRING: &str = "READER_CONN_STRING";
pub const WRITER_CONN_STRING: &str = "WRITER_CONN_STRING";

pub const POOL_SIZE_VAR: &str = "STACPOOL_POOL_SIZE";
pub const MAX_OVERFLOW_VAR: &str = "STACPOOL_MAX_OVERFLOW";
pub const RECYCLE_VAR: &str = "STACPOOL_POOL_RECYCLE";
pub const TIMEOUT_VAR: &str = "STACPOOL_POOL_TIMEOUT";
pub const PRE_PING_VAR: &str = "STACPOOL_POOL_PRE_PING";

/// Pool sizing and connection health parameters.
///
/// An engine copies its config at build time, so later edits to a
/// `PoolConfig` value never affect a running engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections kept open when idle
    pub pool_size: u32,
    /// Extra connections allowed above `pool_size` under load
    pub max_overflow: u32,
    /// Maximum connection age in seconds before replacement (0 disables)
    pub recycle_seconds: u64,
    /// How long a checkout waits for a free slot
    pub timeout_seconds: u64,
    /// Probe idle connections before handing them out
    pub pre_ping: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            max_overflow: 10,
            recycle_seconds: 3600,
            timeout_seconds: 30,
            pre_ping: true,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    pub fn with_max_overflow(mut self, overflow: u32) -> Self {
        self.max_overflow = overflow;
        self
    }

    pub fn with_recycle_seconds(mut self, seconds: u64) -> Self {
        self.recycle_seconds = seconds;
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_pre_ping(mut self, enabled: bool) -> Self {
        self.pre_ping = enabled;
        self
    }

    /// Hard ceiling on physical connections: `pool_size + max_overflow`
    pub fn capacity(&self) -> usize {
        self.pool_size as usize + self.max_overflow as usize
    }

    /// Maximum connection age, `None` when recycling is disabled
    pub fn recycle(&self) -> Option<Duration> {
        (self.recycle_seconds > 0).then(|| Duration::from_secs(self.recycle_seconds))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::InvalidPool {
                reason: "pool_size must be at least 1".to_string(),
            });
        }
        if self.capacity() > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(ConfigError::InvalidPool {
                reason: format!(
                    "pool_size + max_overflow exceeds {}",
                    tokio::sync::Semaphore::MAX_PERMITS
                ),
            });
        }
        Ok(())
    }

    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary key lookup (env, test maps)
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(POOL_SIZE_VAR) {
            self.pool_size = parse_var(POOL_SIZE_VAR, &v)?;
        }
        if let Some(v) = lookup(MAX_OVERFLOW_VAR) {
            self.max_overflow = parse_var(MAX_OVERFLOW_VAR, &v)?;
        }
        if let Some(v) = lookup(RECYCLE_VAR) {
            self.recycle_seconds = parse_var(RECYCLE_VAR, &v)?;
        }
        if let Some(v) = lookup(TIMEOUT_VAR) {
            self.timeout_seconds = parse_var(TIMEOUT_VAR, &v)?;
        }
        if let Some(v) = lookup(PRE_PING_VAR) {
            self.pre_ping = parse_bool(PRE_PING_VAR, &v)?;
        }
        Ok(self)
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    })
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        }),
    }
}

/// Reader/writer connection strings plus pool tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub reader_connection_string: Option<String>,
    pub writer_connection_string: Option<String>,
}

impl Settings {
    /// Build settings purely from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let settings = Self {
            database: DatabaseSettings::default(),
            pool: PoolConfig::default(),
        };
        settings.with_overrides(lookup)
    }

    /// Load a TOML settings file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// Load a TOML settings file, then apply overrides from `lookup`
    pub fn load_with<F>(path: impl AsRef<Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.with_overrides(lookup)
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(reader) = lookup(READER_CONN_STRING) {
            self.database.reader_connection_string = Some(reader);
        }
        if let Some(writer) = lookup(WRITER_CONN_STRING) {
            self.database.writer_connection_string = Some(writer);
        }
        self.pool = self.pool.overlay(&lookup)?;
        Ok(self)
    }

    pub fn reader_connection_string(&self) -> Result<&str, ConfigError> {
        required(
            self.database.reader_connection_string.as_deref(),
            READER_CONN_STRING,
        )
    }

    pub fn writer_connection_string(&self) -> Result<&str, ConfigError> {
        required(
            self.database.writer_connection_string.as_deref(),
            WRITER_CONN_STRING,
        )
    }
}

fn required<'a>(value: Option<&'a str>, name: &'static str) -> Result<&'a str, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing { name }),
    }
}
