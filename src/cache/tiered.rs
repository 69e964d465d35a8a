//! L1 + L2 cache facade.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::entry::{CacheEntry, CacheLevel};
use super::memory::MemoryCache;
use super::store::{MemoryStore, PersistentStore};
use crate::config::CacheConfig;
use crate::parser::Identifier;
use crate::resolver::ResolvedRecord;

/// Hit and miss counts for one level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LevelStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

impl LevelStats {
    fn new(hits: u64, misses: u64) -> Self {
        let total = hits + misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        Self {
            hits,
            misses,
            hit_rate,
        }
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub l1: LevelStats,
    pub l2: LevelStats,
}

#[derive(Debug, Default)]
struct Counters {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
}

/// Two-level record cache keyed by identifier.
///
/// L2 failures never surface: a read error is a miss and a write error is
/// logged and skipped.
#[derive(Debug)]
pub struct TieredCache {
    l1: MemoryCache,
    l2: Arc<dyn PersistentStore>,
    l2_ttl: Duration,
    counters: Counters,
}

impl TieredCache {
    #[must_use]
    pub fn new(l1: MemoryCache, l2: Arc<dyn PersistentStore>, l2_ttl: Duration) -> Self {
        Self {
            l1,
            l2,
            l2_ttl,
            counters: Counters::default(),
        }
    }

    /// Builds the cache described by `config` on top of `l2`.
    #[must_use]
    pub fn from_config(config: &CacheConfig, l2: Arc<dyn PersistentStore>) -> Self {
        Self::new(
            MemoryCache::new(config.l1_capacity, config.l1_shards, config.l1_ttl),
            l2,
            config.l2_ttl,
        )
    }

    /// Cache whose L2 lives in process memory.
    #[must_use]
    pub fn in_memory(config: &CacheConfig) -> Self {
        Self::from_config(config, Arc::new(MemoryStore::new()))
    }

    /// Returns the cached record for `identifier`, if any.
    pub async fn get(&self, identifier: &Identifier) -> Option<ResolvedRecord> {
        self.lookup(identifier).await.map(|entry| entry.record)
    }

    /// Like [`get`](Self::get), but reports which level answered.
    ///
    /// An L2 hit is promoted into L1 before returning.
    #[instrument(skip(self), fields(doi = %identifier))]
    pub async fn lookup(&self, identifier: &Identifier) -> Option<CacheEntry> {
        let key = identifier.as_str();

        if let Some((record, expires_at)) = self.l1.get_with_expiry(key) {
            self.counters.l1_hits.fetch_add(1, Ordering::Relaxed);
            debug!("L1 hit");
            return Some(CacheEntry::expiring_at(record, expires_at, CacheLevel::Memory));
        }
        self.counters.l1_misses.fetch_add(1, Ordering::Relaxed);

        let Some(entry) = self.read_l2(key).await else {
            self.counters.l2_misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        self.counters.l2_hits.fetch_add(1, Ordering::Relaxed);
        debug!("L2 hit, promoting");
        // The promoted copy must not outlive the persistent row.
        if let Some(remaining) = entry.remaining() {
            self.l1.insert_for(key, entry.record.clone(), remaining);
        }
        Some(entry)
    }

    async fn read_l2(&self, key: &str) -> Option<CacheEntry> {
        let bytes = match self.l2.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(error) => {
                warn!(error = %error, key, "L2 read failed; treating as miss");
                return None;
            }
        };
        match CacheEntry::decode(key, &bytes) {
            Ok(entry) if entry.is_expired() => None,
            Ok(entry) => Some(entry),
            Err(error) => {
                warn!(error = %error, key, "corrupt L2 entry; treating as miss");
                None
            }
        }
    }

    /// Writes `record` through both levels.
    #[instrument(skip(self, record), fields(doi = %identifier))]
    pub async fn put(&self, identifier: &Identifier, record: &ResolvedRecord) {
        self.l1.insert(identifier.as_str(), record.clone());
        self.write_l2(identifier, record).await;
    }

    /// Writes `record` into L2 only.
    pub async fn seed(&self, record: &ResolvedRecord) {
        self.write_l2(record.identifier(), record).await;
    }

    async fn write_l2(&self, identifier: &Identifier, record: &ResolvedRecord) {
        let entry = CacheEntry::new(record.clone(), self.l2_ttl, CacheLevel::Persistent);
        let bytes = match entry.encode() {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(error = %error, doi = %identifier, "record not serializable; L2 write skipped");
                return;
            }
        };
        if let Err(error) = self.l2.put(identifier.as_str(), &bytes, self.l2_ttl).await {
            warn!(error = %error, doi = %identifier, "L2 write failed; skipped");
        }
    }

    /// Removes `identifier` from both levels.
    pub async fn invalidate(&self, identifier: &Identifier) {
        self.l1.remove(identifier.as_str());
        if let Err(error) = self.l2.delete(identifier.as_str()).await {
            warn!(error = %error, doi = %identifier, "L2 delete failed");
        }
    }

    /// Drops expired L2 entries; returns how many were removed.
    pub async fn cleanup(&self) -> u64 {
        match self.l2.cleanup_expired().await {
            Ok(removed) => removed,
            Err(error) => {
                warn!(error = %error, "L2 cleanup failed");
                0
            }
        }
    }

    pub fn clear_memory(&self) {
        self.l1.clear();
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CacheStats {
            l1: LevelStats::new(load(&self.counters.l1_hits), load(&self.counters.l1_misses)),
            l2: LevelStats::new(load(&self.counters.l2_hits), load(&self.counters.l2_misses)),
        }
    }
}
