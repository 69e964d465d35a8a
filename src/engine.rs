//! Wires an [`EngineConfig`] into a ready-to-run [`BatchCoordinator`].

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::batch::{BatchCoordinator, BatchResult, ProgressCallback};
use crate::cache::{MemoryStore, PersistentStore, SqliteStore, TieredCache};
use crate::config::{ConfigError, EngineConfig};
use crate::db::{Database, DbError};
use crate::http::{ConnectionPool, FetchError, RateLimiter, RetryPolicy};
use crate::resolver::{Resolve, SourceResolver};
use crate::user_agent::resolver_user_agent;

/// Errors that prevent an engine from being built.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot build HTTP transport: {0}")]
    Http(#[from] FetchError),

    #[error("cannot open cache database: {0}\n  Suggestion: check the --cache-db path or omit it to cache in memory")]
    Database(#[from] DbError),
}

/// A fully wired resolution engine.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    resolver: Arc<SourceResolver>,
    cache: Arc<TieredCache>,
    coordinator: BatchCoordinator,
}

impl Engine {
    /// Validates `config` and builds every component.
    ///
    /// When `config.cache.database` is set, L2 is an SQLite file (created
    /// and migrated if needed); otherwise L2 lives in process memory.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] for invalid configuration, an unbuildable
    /// HTTP client, or an unusable cache database.
    pub async fn build(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let policy = RetryPolicy::new(
            config.pool.max_retries,
            config.pool.base_delay,
            config.pool.max_delay,
        );
        let user_agent = resolver_user_agent(config.mailto.as_deref());
        let pool = Arc::new(ConnectionPool::new(
            &user_agent,
            config.pool.size,
            config.pool.fetch_timeout,
            policy,
        )?);
        let limiter = Arc::new(RateLimiter::new());
        let resolver = Arc::new(
            SourceResolver::new(config.sources.clone(), pool, limiter)?
                .with_mailto(config.mailto.clone()),
        );

        let l2: Arc<dyn PersistentStore> = match &config.cache.database {
            Some(path) => {
                debug!(path = %path.display(), "opening L2 cache database");
                Arc::new(SqliteStore::new(Database::new(path).await?))
            }
            None => Arc::new(MemoryStore::new()),
        };
        let cache = Arc::new(TieredCache::from_config(&config.cache, l2));

        let dyn_resolver: Arc<dyn Resolve> = Arc::clone(&resolver) as Arc<dyn Resolve>;
        let coordinator = BatchCoordinator::new(dyn_resolver, Arc::clone(&cache), &config.batch)?;

        info!(
            sources = %config
                .sources
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(","),
            concurrency = config.batch.concurrency,
            persistent_cache = config.cache.database.is_some(),
            "engine ready"
        );

        Ok(Self {
            config,
            resolver,
            cache,
            coordinator,
        })
    }

    /// Installs a progress callback on the coordinator.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.coordinator = self.coordinator.with_progress(progress);
        self
    }

    /// Resolves one batch.
    pub async fn run<S: AsRef<str>>(&self, inputs: &[S], cancel: &CancellationToken) -> BatchResult {
        self.coordinator.run(inputs, cancel).await
    }

    /// Resolves one batch with a worker-pool width for this run only.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `concurrency` is zero or above the maximum.
    pub async fn run_with_concurrency<S: AsRef<str>>(
        &self,
        inputs: &[S],
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, ConfigError> {
        self.coordinator
            .run_with_concurrency(inputs, concurrency, cancel)
            .await
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn resolver(&self) -> &SourceResolver {
        &self.resolver
    }

    #[must_use]
    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    #[must_use]
    pub fn coordinator(&self) -> &BatchCoordinator {
        &self.coordinator
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    use crate::config::CacheConfig;
    use crate::failure::FailureKind;
    use crate::resolver::{PayloadFormat, SourceConfig};
    use crate::test_support::socket_guard::start_mock_server_or_skip;

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let config = EngineConfig {
            sources: Vec::new(),
            ..EngineConfig::default()
        };
        let error = Engine::build(config).await.unwrap_err();
        assert!(matches!(error, EngineError::Config(ConfigError::NoSources)));
    }

    #[tokio::test]
    async fn test_build_rejects_bad_mailto() {
        let config = EngineConfig {
            mailto: Some("nobody".to_string()),
            ..EngineConfig::default()
        };
        assert!(matches!(
            Engine::build(config).await.unwrap_err(),
            EngineError::Config(ConfigError::Invalid { field: "mailto", .. })
        ));
    }

    #[tokio::test]
    async fn test_engine_resolves_and_persists_to_sqlite() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/works/10.1234/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"status":"ok","message":{"title":["A Study"],"author":[{"family":"Smith","given":"Jane"}],"issued":{"date-parts":[[2020]]}}}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("cache.db");
        let config = EngineConfig {
            sources: vec![
                SourceConfig::new("mock", format!("{}/works/{{doi}}", server.uri()), PayloadFormat::CrossrefJson)
                    .with_rate(0, Duration::from_secs(1)),
            ],
            cache: CacheConfig {
                database: Some(db_path.clone()),
                ..CacheConfig::default()
            },
            ..EngineConfig::default()
        };

        let engine = Engine::build(config.clone()).await.unwrap();
        let result = engine
            .run(&["10.1234/abc", "not-a-doi"], &CancellationToken::new())
            .await;
        assert_eq!(result.stats.succeeded, 1);
        assert_eq!(result.entries[0].key(), Some("smith2020"));
        assert_eq!(result.entries[1].error().unwrap().kind, FailureKind::Validation);
        drop(engine);

        // A second engine on the same file answers from L2.
        let engine = Engine::build(config).await.unwrap();
        let result = engine.run(&["10.1234/abc"], &CancellationToken::new()).await;
        assert_eq!(result.stats.cache_hits, 1);
        assert_eq!(engine.cache().stats().l2.hits, 1);
    }
}
