//! SQLite pool backing the persistent cache level.
//!
//! Every pooled connection is opened in WAL mode with a busy timeout, so
//! concurrent cache writers queue instead of failing with `SQLITE_BUSY`.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

/// SQLite locks the whole file for writes; more connections only add waiting.
const MAX_CONNECTIONS: u32 = 4;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed to open cache database: {0}\n  Suggestion: check that the directory exists and is writable")]
    Connection(#[from] sqlx::Error),

    #[error("cache schema migration failed: {0}\n  Suggestion: delete the cache file; it is rebuilt on the next run")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Migrated connection pool for the citation cache.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the cache file at `db_path`, creating it when missing.
    ///
    /// # Errors
    ///
    /// [`DbError::Connection`] when the file cannot be opened,
    /// [`DbError::Migration`] when the schema cannot be applied.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;
        Self::migrated(pool).await
    }

    /// Private in-memory cache database. One connection, since every
    /// `:memory:` connection would otherwise see its own empty database.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self, DbError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!("cache schema up to date");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Waits for pooled connections to close, flushing the WAL.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const INSERT: &str = "INSERT INTO citation_cache (cache_key, payload, expires_at, updated_at) VALUES ('k', x'00', 0, 0)";

    #[tokio::test]
    async fn test_in_memory_database_has_cache_table() {
        let db = Database::new_in_memory().await.unwrap();
        assert!(sqlx::query(INSERT).execute(db.pool()).await.is_ok());
    }

    #[tokio::test]
    async fn test_cache_key_is_unique() {
        let db = Database::new_in_memory().await.unwrap();
        sqlx::query(INSERT).execute(db.pool()).await.unwrap();
        assert!(sqlx::query(INSERT).execute(db.pool()).await.is_err());
    }

    #[test]
    fn test_database_opens_from_sync_context() {
        let db = tokio_test::block_on(Database::new_in_memory());
        assert!(db.is_ok());
    }

    #[tokio::test]
    async fn test_file_database_uses_wal_on_every_connection() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested.db");

        let db = Database::new(&db_path).await.unwrap();
        // Hold two connections at once so both are checked.
        let mut first = db.pool().acquire().await.unwrap();
        let mut second = db.pool().acquire().await.unwrap();
        for conn in [&mut first, &mut second] {
            let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
                .fetch_one(&mut **conn)
                .await
                .unwrap();
            assert!(mode.eq_ignore_ascii_case("wal"));
            let (timeout,): (i64,) = sqlx::query_as("PRAGMA busy_timeout")
                .fetch_one(&mut **conn)
                .await
                .unwrap();
            assert_eq!(timeout, 5000);
        }
        drop((first, second));

        db.close().await;
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_missing_directory_is_connection_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("absent").join("cache.db");

        let err = Database::new(&db_path).await.unwrap_err();
        assert!(matches!(err, DbError::Connection(_)));
        assert!(err.to_string().contains("Suggestion"));
    }
}
