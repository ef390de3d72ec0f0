//! Configuration types shared across crates.

use crate::tier::StorageTier;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path (":memory:" for an in-memory database).
        path: PathBuf,
        /// Query timeout in seconds (advisory only - SQLite cannot force-cancel queries).
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(600) // 10 minutes (advisory only)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

/// A configured storage location.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Location name, as used in `destStorage` / `storage` message fields.
    pub name: String,
    /// Retrieval tier.
    pub tier: StorageTier,
    /// Filesystem root. Required for online and nearline locations.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Verify SHA-256 checksums of copied bytes (default: true).
    #[serde(default = "default_verify_checksums")]
    pub verify_checksums: bool,
}

fn default_verify_checksums() -> bool {
    true
}

impl LocationConfig {
    /// Filesystem-backed location.
    pub fn filesystem(name: impl Into<String>, tier: StorageTier, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            tier,
            path: Some(path.into()),
            verify_checksums: default_verify_checksums(),
        }
    }

    /// Reference-only location with no local bytes.
    pub fn offline(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tier: StorageTier::Offline,
            path: None,
            verify_checksums: false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("locations[].name must not be empty".to_string());
        }
        if self.tier.is_physical() && self.path.is_none() {
            return Err(format!(
                "location '{}' is {} and requires a path",
                self.name, self.tier
            ));
        }
        Ok(())
    }
}

/// Restoration cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory of locally restored NEARLINE files.
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    /// Soft size limit in bytes, reported by usage checks (default: 500 GB).
    #[serde(default = "default_cache_max_size_bytes")]
    pub max_size_bytes: u64,
    /// Number of expired entries purged per batch (default: 100).
    #[serde(default = "default_cache_purge_batch_size")]
    pub purge_batch_size: u32,
    /// Seconds a file restored for a copy stays in the cache (default: 1 day).
    #[serde(default = "default_copy_retention_secs")]
    pub copy_retention_secs: u64,
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./data/cache")
}

fn default_cache_max_size_bytes() -> u64 {
    500 * 1024 * 1024 * 1024
}

fn default_cache_purge_batch_size() -> u32 {
    100
}

fn default_copy_retention_secs() -> u64 {
    24 * 60 * 60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            max_size_bytes: default_cache_max_size_bytes(),
            purge_batch_size: default_cache_purge_batch_size(),
            copy_retention_secs: default_copy_retention_secs(),
        }
    }
}

/// Job scheduler configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of requests picked into one job (default: 1000).
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Maximum number of pages claimed per location in one scheduling pass (default: 100).
    #[serde(default = "default_max_pages_per_pass")]
    pub max_pages_per_pass: u32,
    /// Size of the job worker pool (default: 4).
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Run scheduling passes automatically (disabled by default).
    #[serde(default)]
    pub auto_schedule_enabled: bool,
    /// Interval in seconds between automatic scheduling passes (default: 60).
    #[serde(default = "default_auto_schedule_interval_secs")]
    pub auto_schedule_interval_secs: u64,
    /// Interval in seconds between watchdog sweeps of job tasks (default: 10).
    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,
}

fn default_page_size() -> u32 {
    crate::DEFAULT_PAGE_SIZE
}

fn default_max_pages_per_pass() -> u32 {
    100
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_auto_schedule_interval_secs() -> u64 {
    60
}

fn default_watchdog_interval_secs() -> u64 {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_pages_per_pass: default_max_pages_per_pass(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            auto_schedule_enabled: false,
            auto_schedule_interval_secs: default_auto_schedule_interval_secs(),
            watchdog_interval_secs: default_watchdog_interval_secs(),
        }
    }
}

impl SchedulerConfig {
    /// Get the auto schedule interval as a std::time::Duration.
    pub fn auto_schedule_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.auto_schedule_interval_secs)
    }

    /// Get the watchdog interval as a std::time::Duration.
    pub fn watchdog_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.watchdog_interval_secs)
    }

    /// Validate scheduler configuration.
    /// Returns an error for configs that would cause runtime issues.
    pub fn validate(&self) -> Result<(), String> {
        if self.page_size == 0 {
            return Err("scheduler.page_size must be greater than 0".to_string());
        }
        if self.max_pages_per_pass == 0 {
            return Err("scheduler.max_pages_per_pass must be greater than 0".to_string());
        }
        if self.max_concurrent_jobs == 0 {
            return Err("scheduler.max_concurrent_jobs must be greater than 0".to_string());
        }
        // tokio::time::interval panics on a zero period
        if self.auto_schedule_enabled && self.auto_schedule_interval_secs == 0 {
            return Err("scheduler.auto_schedule_interval_secs must be greater than 0".to_string());
        }
        if self.watchdog_interval_secs == 0 {
            return Err("scheduler.watchdog_interval_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Storage locations.
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
    /// Restoration cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Job scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses no storage locations and a small job page.
    pub fn for_testing() -> Self {
        Self {
            metadata: MetadataConfig::Sqlite {
                path: PathBuf::from(":memory:"),
                query_timeout_secs: None,
            },
            locations: Vec::new(),
            cache: CacheConfig::default(),
            scheduler: SchedulerConfig {
                page_size: 10,
                max_pages_per_pass: 10,
                max_concurrent_jobs: 2,
                ..SchedulerConfig::default()
            },
        }
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<(), String> {
        let mut names = HashSet::new();
        for location in &self.locations {
            location.validate()?;
            if !names.insert(location.name.as_str()) {
                return Err(format!("duplicate location name '{}'", location.name));
            }
        }
        if self.cache.purge_batch_size == 0 {
            return Err("cache.purge_batch_size must be greater than 0".to_string());
        }
        if self.cache.copy_retention_secs == 0 {
            return Err("cache.copy_retention_secs must be greater than 0".to_string());
        }
        self.scheduler.validate()
    }
}
