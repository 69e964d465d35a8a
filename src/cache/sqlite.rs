//! SQLite-backed second level.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument};

use super::store::{PersistentStore, StoreError};
use crate::db::Database;

/// [`PersistentStore`] over the `citation_cache` table.
///
/// Expiry is wall-clock (Unix milliseconds) so entries survive restarts.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Number of rows, expired ones included.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn len(&self) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM citation_cache")
            .fetch_one(self.db.pool())
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl PersistentStore for SqliteStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT payload FROM citation_cache WHERE cache_key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(now_millis())
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row.map(|(payload,)| payload))
    }

    #[instrument(skip(self, value), fields(bytes = value.len()))]
    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let now = now_millis();
        sqlx::query(
            r"INSERT INTO citation_cache (cache_key, payload, expires_at, updated_at)
              VALUES (?, ?, ?, ?)
              ON CONFLICT(cache_key) DO UPDATE SET
                  payload = excluded.payload,
                  expires_at = excluded.expires_at,
                  updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(now.saturating_add(ttl_millis(ttl)))
        .bind(now)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM citation_cache WHERE cache_key = ?")
            .bind(key)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM citation_cache WHERE expires_at <= ?")
            .bind(now_millis())
            .execute(self.db.pool())
            .await?;
        debug!(removed = result.rows_affected(), "expired cache rows removed");
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::new(Database::new_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_sqlite_store_put_get_delete() {
        let store = store().await;
        store.put("10.1/a", b"payload", Duration::from_secs(60)).await.unwrap();
        assert_eq!(
            store.get("10.1/a").await.unwrap().as_deref(),
            Some(&b"payload"[..])
        );

        store.delete("10.1/a").await.unwrap();
        assert!(store.get("10.1/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_store_upsert_last_write_wins() {
        let store = store().await;
        store.put("k", b"one", Duration::from_secs(60)).await.unwrap();
        store.put("k", b"two", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some(&b"two"[..]));
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_store_expired_rows_are_misses_until_cleanup() {
        let store = store().await;
        store.put("gone", b"v", Duration::ZERO).await.unwrap();
        store.put("kept", b"v", Duration::from_secs(600)).await.unwrap();

        assert!(store.get("gone").await.unwrap().is_none());
        assert_eq!(store.len().await.unwrap(), 2);

        assert_eq!(store.cleanup_expired().await.unwrap(), 1);
        assert_eq!(store.len().await.unwrap(), 1);
        assert!(store.get("kept").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        let first = SqliteStore::new(Database::new(&path).await.unwrap());
        first.put("10.1/a", b"persisted", Duration::from_secs(600)).await.unwrap();
        first.database().clone().close().await;

        let second = SqliteStore::new(Database::new(&path).await.unwrap());
        assert_eq!(
            second.get("10.1/a").await.unwrap().as_deref(),
            Some(&b"persisted"[..])
        );
    }
}
