//! Second-level store contract and the in-process implementation.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;

/// Failures of a persistent store. The tiered cache logs these and carries on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache store unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Byte-oriented key/value store with per-entry expiry.
///
/// Concurrent writers to the same key resolve as last-write-wins.
#[async_trait]
pub trait PersistentStore: Send + Sync + fmt::Debug {
    /// Returns the live value for `key`; expired values are a miss.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Removes expired entries, returning how many were dropped.
    async fn cleanup_expired(&self) -> Result<u64, StoreError>;
}

/// Longer TTLs are clamped so `Instant` arithmetic cannot overflow.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Instant,
}

/// [`PersistentStore`] kept in process memory. Used when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .filter(|stored| stored.expires_at > now)
            .map(|stored| stored.bytes.clone());
        if value.is_none() {
            self.entries.remove_if(key, |_, stored| stored.expires_at <= now);
        }
        Ok(value)
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let expires_at = Instant::now() + ttl.min(MAX_TTL);
        self.entries.insert(
            key.to_string(),
            StoredValue {
                bytes: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, stored| stored.expires_at > now);
        Ok(u64::try_from(before.saturating_sub(self.entries.len())).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_put_get_delete() {
        let store = MemoryStore::new();
        store.put("k", b"value", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some(&b"value"[..]));

        store.delete("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_last_write_wins() {
        let store = MemoryStore::new();
        store.put("k", b"one", Duration::from_secs(60)).await.unwrap();
        store.put("k", b"two", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some(&b"two"[..]));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_expiry_is_a_miss() {
        let store = MemoryStore::new();
        store.put("k", b"v", Duration::from_secs(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty(), "expired entry is dropped on read");
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_cleanup_expired_counts_removed() {
        let store = MemoryStore::new();
        store.put("short", b"v", Duration::from_secs(1)).await.unwrap();
        store.put("long", b"v", Duration::from_secs(100)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.cleanup_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }
}
