//! Sharded in-process LRU with per-entry TTL (the L1 level).
//!
//! Keys are routed to a shard by hash; each shard has its own mutex, LRU
//! order and share of the capacity, so lookups for different identifiers
//! rarely touch the same lock. Shard capacities sum to the configured
//! capacity, and small caches use fewer shards so no shard is tiny.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

use crate::resolver::ResolvedRecord;

/// Fewest entries a shard is given before the shard count is reduced.
const MIN_SHARD_CAPACITY: usize = 8;

#[derive(Debug)]
struct Slot {
    record: ResolvedRecord,
    expires_at: Instant,
    /// Wall-clock form of `expires_at`, reported to callers.
    expires_wall: DateTime<Utc>,
    /// Position in the shard's recency order.
    tick: u64,
}

#[derive(Debug, Default)]
struct Shard {
    capacity: usize,
    slots: HashMap<String, Slot>,
    /// tick -> key, oldest first.
    order: BTreeMap<u64, String>,
    next_tick: u64,
}

impl Shard {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    fn touch(&mut self, key: &str) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(slot) = self.slots.get_mut(key) {
            self.order.remove(&slot.tick);
            slot.tick = tick;
            self.order.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<Slot> {
        let slot = self.slots.remove(key)?;
        self.order.remove(&slot.tick);
        Some(slot)
    }

    fn evict_lru(&mut self) {
        if let Some((_, key)) = self.order.pop_first() {
            self.slots.remove(&key);
        }
    }
}

/// Bounded, TTL-expiring record cache.
#[derive(Debug)]
pub struct MemoryCache {
    shards: Box<[Mutex<Shard>]>,
    capacity: usize,
    ttl: Duration,
}

impl MemoryCache {
    /// Holds at most `capacity` entries (at least one), spread over at most
    /// `shards` shards.
    #[must_use]
    pub fn new(capacity: usize, shards: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        let shard_count = shards.clamp(1, (capacity / MIN_SHARD_CAPACITY).max(1));
        let base = capacity / shard_count;
        let remainder = capacity % shard_count;
        Self {
            shards: (0..shard_count)
                .map(|i| Mutex::new(Shard::with_capacity(base + usize::from(i < remainder))))
                .collect(),
            capacity,
            ttl,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Live record for `key`, refreshing its recency. Expired entries are dropped.
    pub fn get(&self, key: &str) -> Option<ResolvedRecord> {
        self.get_with_expiry(key).map(|(record, _)| record)
    }

    /// Like [`get`](Self::get), also returning when the entry expires.
    pub fn get_with_expiry(&self, key: &str) -> Option<(ResolvedRecord, DateTime<Utc>)> {
        let mut shard = self.shard(key);
        let expired = shard.slots.get(key)?.expires_at <= Instant::now();
        if expired {
            shard.remove(key);
            return None;
        }
        shard.touch(key);
        shard
            .slots
            .get(key)
            .map(|slot| (slot.record.clone(), slot.expires_wall))
    }

    /// Inserts or replaces `key` with the cache's TTL.
    pub fn insert(&self, key: &str, record: ResolvedRecord) {
        self.insert_for(key, record, self.ttl);
    }

    /// Inserts or replaces `key`, expiring after the shorter of `ttl` and the
    /// cache's TTL. Evicts the shard's least recently used entry when full.
    pub fn insert_for(&self, key: &str, record: ResolvedRecord, ttl: Duration) {
        let ttl = ttl.min(self.ttl);
        let expires_at = Instant::now() + ttl;
        let expires_wall = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut shard = self.shard(key);
        shard.remove(key);
        while shard.slots.len() >= shard.capacity.max(1) {
            shard.evict_lru();
        }
        let tick = shard.next_tick;
        shard.next_tick += 1;
        shard.order.insert(tick, key.to_string());
        shard.slots.insert(
            key.to_string(),
            Slot {
                record,
                expires_at,
                expires_wall,
                tick,
            },
        );
    }

    pub fn remove(&self, key: &str) -> bool {
        self.shard(key).remove(key).is_some()
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap_or_else(PoisonError::into_inner);
            shard.slots.clear();
            shard.order.clear();
        }
    }

    /// Entries currently held, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap_or_else(PoisonError::into_inner).slots.len())
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard(&self, key: &str) -> MutexGuard<'_, Shard> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        self.shards[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
