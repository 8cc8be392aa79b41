//! Configuration for attached computations and their store

use crate::error::{MemoError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the database file
pub const ENV_DB_PATH: &str = "MEMO_DB_PATH";
/// Environment variable overriding [`StoreConfig::busy_timeout`], in milliseconds
pub const ENV_BUSY_TIMEOUT_MS: &str = "MEMO_BUSY_TIMEOUT_MS";
/// Environment variable overriding [`MemoConfig::capacity`]
pub const ENV_CAPACITY: &str = "MEMO_CAPACITY";

/// Per-computation cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoConfig {
    /// Maximum number of entries held in memory
    pub capacity: usize,

    /// Extra attempts after a failed flush before the error is surfaced
    pub flush_retries: u32,

    /// Pause between flush attempts
    pub flush_retry_delay: Duration,
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            // retry once, then surface
            flush_retries: 1,
            flush_retry_delay: Duration::from_millis(100),
        }
    }
}

impl MemoConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> MemoConfigBuilder {
        MemoConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(MemoError::ConfigError(
                "capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Capacity as the non-zero type the eviction cache requires
    pub fn capacity_nonzero(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.capacity).ok_or_else(|| {
            MemoError::ConfigError("capacity must be greater than 0".to_string())
        })
    }

    /// Defaults overridden by `MEMO_CAPACITY` (a `.env` file is honoured)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();
        if let Ok(raw) = std::env::var(ENV_CAPACITY) {
            config.capacity = raw.trim().parse().map_err(|_| {
                MemoError::ConfigError(format!("{} is not a number: {:?}", ENV_CAPACITY, raw))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Configuration for memory-constrained hosts
    pub fn small() -> Self {
        Self {
            capacity: 100,
            ..Default::default()
        }
    }

    /// Configuration for large result sets
    pub fn large() -> Self {
        Self {
            capacity: 100_000,
            flush_retries: 2,
            flush_retry_delay: Duration::from_millis(250),
        }
    }
}

/// Builder for [`MemoConfig`]
#[derive(Debug, Default)]
pub struct MemoConfigBuilder {
    capacity: Option<usize>,
    flush_retries: Option<u32>,
    flush_retry_delay: Option<Duration>,
}

impl MemoConfigBuilder {
    /// Set the maximum number of in-memory entries
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Set how many times a failed flush is repeated
    pub fn flush_retries(mut self, retries: u32) -> Self {
        self.flush_retries = Some(retries);
        self
    }

    /// Set the pause between flush attempts
    pub fn flush_retry_delay(mut self, delay: Duration) -> Self {
        self.flush_retry_delay = Some(delay);
        self
    }

    pub fn build(self) -> MemoConfig {
        let defaults = MemoConfig::default();

        MemoConfig {
            capacity: self.capacity.unwrap_or(defaults.capacity),
            flush_retries: self.flush_retries.unwrap_or(defaults.flush_retries),
            flush_retry_delay: self.flush_retry_delay.unwrap_or(defaults.flush_retry_delay),
        }
    }
}

/// Where a store keeps its data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreLocation {
    File(PathBuf),
    InMemory,
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreLocation::File(path) => write!(f, "{}", path.display()),
            StoreLocation::InMemory => write!(f, ":memory:"),
        }
    }
}

/// Store settings, passed explicitly to the backend that opens the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub location: StoreLocation,

    /// How long a writer waits on a locked database before failing
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            location: StoreLocation::File(path.as_ref().to_path_buf()),
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            location: StoreLocation::InMemory,
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Read `MEMO_DB_PATH` and `MEMO_BUSY_TIMEOUT_MS` (a `.env` file is honoured)
    ///
    /// The path is required; there is no implicit default database file.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let path = std::env::var(ENV_DB_PATH)
            .map_err(|_| MemoError::ConfigError(format!("{} is not set", ENV_DB_PATH)))?;
        let mut config = Self::file(path);

        if let Ok(raw) = std::env::var(ENV_BUSY_TIMEOUT_MS) {
            let ms: u64 = raw.trim().parse().map_err(|_| {
                MemoError::ConfigError(format!(
                    "{} is not a number: {:?}",
                    ENV_BUSY_TIMEOUT_MS, raw
                ))
            })?;
            config.busy_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }
}
