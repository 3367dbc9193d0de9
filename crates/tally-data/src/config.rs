//! # Data Service Configuration
//!
//! Configuration for the store this terminal serves and for the data
//! service's cache, retry, outbox and feed behaviour.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TALLY_STORE_ID=laundry-01                                          │
//! │     TALLY_CACHE_TTL_SECS=120                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tally-pos/tally.toml (Linux)                             │
//! │     ~/Library/Application Support/com.tally.pos/tally.toml (macOS)     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     5 minute cache, 3 commit attempts, in-memory cache store           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # tally.toml
//! [store]
//! id = "laundry-01"
//! name = "Fresh Fold Laundry"
//! utc_offset_minutes = 360
//!
//! [database]
//! path = "/var/lib/tally/tally.db"
//!
//! [cache]
//! ttl_secs = 300
//! backend = "sqlite"   # memory | sqlite
//!
//! [retry]
//! max_attempts = 3
//! initial_backoff_ms = 1000
//! multiplier = 2.0
//!
//! [outbox]
//! poll_interval_secs = 5
//! batch_size = 50
//! max_attempts = 10
//!
//! [feed]
//! capacity = 256
//! coalesce_window_ms = 50
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use tally_db::DbConfig;

use crate::error::{DataError, DataResult};

/// Largest UTC offset a store may be configured with (UTC+14).
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

// =============================================================================
// Cache Backend
// =============================================================================

/// Where cached collections are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    /// Process memory. Lost on restart.
    #[default]
    Memory,

    /// A local SQLite file, separate from the system of record.
    Sqlite,
}

impl std::fmt::Display for CacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheBackend::Memory => write!(f, "memory"),
            CacheBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for CacheBackend {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(CacheBackend::Memory),
            "sqlite" | "disk" => Ok(CacheBackend::Sqlite),
            other => Err(DataError::InvalidConfig(format!(
                "Unknown cache backend: '{}'. Valid options: memory, sqlite",
                other
            ))),
        }
    }
}

// =============================================================================
// Store Configuration
// =============================================================================

/// The store this terminal belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Unique store identifier.
    pub id: String,

    /// Human-readable store name.
    #[serde(default)]
    pub name: String,

    /// Offset from UTC used to decide the business date of invoice numbers.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            id: "default-store".to_string(),
            name: "Default Store".to_string(),
            utc_offset_minutes: 0,
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

/// Location of the system of record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to `tally.db` in the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Cache Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Seconds a cached collection stays fresh.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default)]
    pub backend: CacheBackend,

    /// File for the sqlite backend. Defaults to `cache.db` in the platform
    /// cache directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_ttl_secs() -> u64 {
    tally_core::DEFAULT_CACHE_TTL_SECS
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            ttl_secs: default_ttl_secs(),
            backend: CacheBackend::default(),
            path: None,
        }
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// Retry policy for the atomic sale commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait after the first failure.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Growth factor of the wait between attempts.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    tally_core::MAX_COMMIT_ATTEMPTS
}
fn default_initial_backoff_ms() -> u64 {
    1000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

// =============================================================================
// Outbox Settings
// =============================================================================

/// Ledger outbox worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Delivery attempts before a task is left for an operator.
    #[serde(default = "default_outbox_max_attempts")]
    pub max_attempts: u32,
}

fn default_poll_interval() -> u64 {
    5
}
fn default_batch_size() -> u32 {
    50
}
fn default_outbox_max_attempts() -> u32 {
    10
}

impl Default for OutboxSettings {
    fn default() -> Self {
        OutboxSettings {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            max_attempts: default_outbox_max_attempts(),
        }
    }
}

// =============================================================================
// Feed Settings
// =============================================================================

/// Change feed and push subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSettings {
    /// Events buffered per subscriber before it lags.
    #[serde(default = "default_feed_capacity")]
    pub capacity: usize,

    /// Quiet period used to fold a burst of changes into one snapshot.
    #[serde(default = "default_coalesce_window")]
    pub coalesce_window_ms: u64,
}

fn default_feed_capacity() -> usize {
    tally_db::feed::DEFAULT_FEED_CAPACITY
}
fn default_coalesce_window() -> u64 {
    50
}

impl Default for FeedSettings {
    fn default() -> Self {
        FeedSettings {
            capacity: default_feed_capacity(),
            coalesce_window_ms: default_coalesce_window(),
        }
    }
}

// =============================================================================
// Main Data Configuration
// =============================================================================

/// Complete data service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub outbox: OutboxSettings,

    #[serde(default)]
    pub feed: FeedSettings,
}

impl DataConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (tally.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> DataResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading data config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load data config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> DataResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| DataError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Data config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DataResult<()> {
        tally_core::validation::validate_store_id(&self.store.id)?;

        if self.store.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(DataError::InvalidConfig(format!(
                "utc_offset_minutes must be within ±{}, got {}",
                MAX_UTC_OFFSET_MINUTES, self.store.utc_offset_minutes
            )));
        }

        if self.cache.ttl_secs == 0 {
            return Err(DataError::InvalidConfig(
                "cache ttl_secs must be greater than 0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(DataError::InvalidConfig(
                "retry max_attempts must be at least 1".into(),
            ));
        }

        if !(self.retry.multiplier >= 1.0) {
            return Err(DataError::InvalidConfig(
                "retry multiplier must be at least 1.0".into(),
            ));
        }

        if self.outbox.batch_size == 0 || self.outbox.poll_interval_secs == 0 {
            return Err(DataError::InvalidConfig(
                "outbox batch_size and poll_interval_secs must be greater than 0".into(),
            ));
        }

        if self.feed.capacity == 0 {
            return Err(DataError::InvalidConfig(
                "feed capacity must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `TALLY_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("TALLY_STORE_ID") {
            debug!(store_id = %id, "Overriding store ID from environment");
            self.store.id = id;
        }

        if let Some(name) = lookup("TALLY_STORE_NAME") {
            self.store.name = name;
        }

        if let Some(offset) = lookup("TALLY_UTC_OFFSET_MINUTES") {
            match offset.parse::<i32>() {
                Ok(minutes) => self.store.utc_offset_minutes = minutes,
                Err(_) => warn!(value = %offset, "Ignoring invalid TALLY_UTC_OFFSET_MINUTES"),
            }
        }

        if let Some(path) = lookup("TALLY_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(ttl) = lookup("TALLY_CACHE_TTL_SECS") {
            if let Ok(secs) = ttl.parse::<u64>() {
                debug!(ttl_secs = secs, "Overriding cache TTL from environment");
                self.cache.ttl_secs = secs;
            }
        }

        if let Some(backend) = lookup("TALLY_CACHE_BACKEND") {
            match backend.parse() {
                Ok(parsed) => self.cache.backend = parsed,
                Err(_) => warn!(backend = %backend, "Unknown cache backend in environment"),
            }
        }

        if let Some(path) = lookup("TALLY_CACHE_PATH") {
            self.cache.path = Some(PathBuf::from(path));
        }

        if let Some(attempts) = lookup("TALLY_RETRY_MAX_ATTEMPTS") {
            if let Ok(n) = attempts.parse::<u32>() {
                self.retry.max_attempts = n;
            }
        }

        if let Some(secs) = lookup("TALLY_OUTBOX_POLL_SECS") {
            if let Ok(n) = secs.parse::<u64>() {
                self.outbox.poll_interval_secs = n;
            }
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "tally", "pos")
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("tally.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn store_id(&self) -> &str {
        &self.store.id
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.feed.coalesce_window_ms)
    }

    /// Resolved sqlite cache file.
    pub fn cache_path(&self) -> Option<PathBuf> {
        self.cache
            .path
            .clone()
            .or_else(|| Self::project_dirs().map(|dirs| dirs.cache_dir().join("cache.db")))
    }

    /// Database settings for the system of record.
    pub fn db_config(&self) -> DataResult<DbConfig> {
        let path = self
            .database
            .path
            .clone()
            .or_else(|| Self::project_dirs().map(|dirs| dirs.data_dir().join("tally.db")))
            .ok_or_else(|| DataError::InvalidConfig("No database path available".into()))?;

        Ok(DbConfig::new(path)
            .max_connections(self.database.max_connections)
            .feed_capacity(self.feed.capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_cache_backend_parsing() {
        assert_eq!("memory".parse::<CacheBackend>().unwrap(), CacheBackend::Memory);
        assert_eq!("SQLITE".parse::<CacheBackend>().unwrap(), CacheBackend::Sqlite);
        assert!("redis".parse::<CacheBackend>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = DataConfig::default();
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_backoff_ms, 1000);
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = DataConfig::default();

        config.store.id = String::new();
        assert!(config.validate().is_err());

        config.store.id = "laundry-01".to_string();
        config.cache.ttl_secs = 0;
        assert!(config.validate().is_err());

        config.cache.ttl_secs = 60;
        config.retry.multiplier = 0.5;
        assert!(config.validate().is_err());

        config.retry.multiplier = 2.0;
        config.store.utc_offset_minutes = 15 * 60;
        assert!(config.validate().is_err());

        config.store.utc_offset_minutes = -5 * 60;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TALLY_STORE_ID", "laundry-02"),
            ("TALLY_CACHE_TTL_SECS", "90"),
            ("TALLY_CACHE_BACKEND", "sqlite"),
            ("TALLY_UTC_OFFSET_MINUTES", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = DataConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.store_id(), "laundry-02");
        assert_eq!(config.cache_ttl(), Duration::from_secs(90));
        assert_eq!(config.cache.backend, CacheBackend::Sqlite);
        assert_eq!(config.store.utc_offset_minutes, 0);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: DataConfig = toml::from_str(
            r#"
            [store]
            id = "laundry-01"
            utc_offset_minutes = 360

            [cache]
            backend = "sqlite"
            "#,
        )
        .unwrap();

        assert_eq!(config.store.utc_offset_minutes, 360);
        assert_eq!(config.cache.backend, CacheBackend::Sqlite);
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.outbox.batch_size, 50);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tally.toml");

        let mut config = DataConfig::default();
        config.store.id = "laundry-03".to_string();
        config.retry.max_attempts = 5;
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[store]"));
        assert!(contents.contains("[retry]"));

        let loaded: DataConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.store.id, "laundry-03");
        assert_eq!(loaded.retry.max_attempts, 5);
    }
}
