//! Engine configuration.
//!
//! All knobs have defaults; [`EngineConfig::validate`] rejects the few
//! combinations that cannot work (no sources, zero concurrency, templates
//! without a `{doi}` placeholder).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::http::{DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_POOL_SIZE};
use crate::keys::KeyPattern;
use crate::resolver::SourceConfig;

/// Default number of identifiers resolved concurrently.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Upper bound on concurrency accepted from configuration.
pub const MAX_CONCURRENCY: usize = 100;

/// Default L1 capacity (entries across all shards).
pub const DEFAULT_L1_CAPACITY: usize = 10_000;

/// Default number of L1 shards.
pub const DEFAULT_L1_SHARDS: usize = 16;

/// Default L1 time-to-live.
pub const DEFAULT_L1_TTL: Duration = Duration::from_secs(60 * 60);

/// Default L2 time-to-live.
pub const DEFAULT_L2_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Fatal configuration problems. Per-identifier failures never end up here.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no upstream sources configured\n  Suggestion: keep at least one of crossref, datacite, doi.org")]
    NoSources,

    #[error("invalid source '{name}': {reason}")]
    InvalidSource { name: String, reason: String },

    #[error("duplicate source '{name}'\n  Suggestion: list each source once")]
    DuplicateSource { name: String },

    #[error("{field} must be at least 1")]
    Zero { field: &'static str },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Connection pool and retry settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Maximum idle and concurrent connections per host.
    pub size: usize,
    pub fetch_timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_POOL_SIZE,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
        }
    }
}

/// Two-level cache settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub l1_capacity: usize,
    pub l1_shards: usize,
    pub l1_ttl: Duration,
    pub l2_ttl: Duration,
    /// SQLite file backing L2. `None` keeps L2 in process memory.
    pub database: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_capacity: DEFAULT_L1_CAPACITY,
            l1_shards: DEFAULT_L1_SHARDS,
            l1_ttl: DEFAULT_L1_TTL,
            l2_ttl: DEFAULT_L2_TTL,
            database: None,
        }
    }
}

/// Batch settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub concurrency: usize,
    /// Overall deadline for one batch.
    pub timeout: Option<Duration>,
    pub key_pattern: KeyPattern,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: None,
            key_pattern: KeyPattern::default(),
        }
    }
}

/// Everything needed to build an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Sources in the order they are tried.
    pub sources: Vec<SourceConfig>,
    pub pool: PoolConfig,
    pub cache: CacheConfig,
    pub batch: BatchConfig,
    /// Contact address sent to polite-pool APIs.
    pub mailto: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sources: SourceConfig::defaults(),
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            batch: BatchConfig::default(),
            mailto: None,
        }
    }
}

impl EngineConfig {
    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_sources(&self.sources)?;
        if self.pool.size == 0 {
            return Err(ConfigError::Zero { field: "pool size" });
        }
        if self.pool.fetch_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "fetch timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.cache.l1_capacity == 0 {
            return Err(ConfigError::Zero { field: "L1 capacity" });
        }
        if self.cache.l1_shards == 0 {
            return Err(ConfigError::Zero { field: "L1 shard count" });
        }
        validate_concurrency(self.batch.concurrency)?;
        if let Some(mailto) = &self.mailto
            && !mailto.contains('@')
        {
            return Err(ConfigError::Invalid {
                field: "mailto",
                reason: format!("'{mailto}' is not an email address"),
            });
        }
        Ok(())
    }
}

/// Rejects empty, duplicated or malformed source lists.
pub(crate) fn validate_sources(sources: &[SourceConfig]) -> Result<(), ConfigError> {
    if sources.is_empty() {
        return Err(ConfigError::NoSources);
    }
    for (index, source) in sources.iter().enumerate() {
        source
            .validate()
            .map_err(|reason| ConfigError::InvalidSource {
                name: source.name.to_string(),
                reason,
            })?;
        if sources[..index].iter().any(|s| s.name == source.name) {
            return Err(ConfigError::DuplicateSource {
                name: source.name.to_string(),
            });
        }
    }
    Ok(())
}

pub(crate) fn validate_concurrency(concurrency: usize) -> Result<(), ConfigError> {
    if concurrency == 0 {
        return Err(ConfigError::Zero {
            field: "concurrency",
        });
    }
    if concurrency > MAX_CONCURRENCY {
        return Err(ConfigError::Invalid {
            field: "concurrency",
            reason: format!("{concurrency} exceeds the maximum of {MAX_CONCURRENCY}"),
        });
    }
    Ok(())
}
