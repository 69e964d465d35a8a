//! Two-level cache of resolved records.
//!
//! - [`MemoryCache`] - sharded LRU with TTL (L1)
//! - [`PersistentStore`] - byte store contract (L2), implemented by
//!   [`SqliteStore`] and [`MemoryStore`]
//! - [`TieredCache`] - read-through/write-through facade with promotion
//! - [`CacheEntry`] - versioned envelope written to L2

mod entry;
mod memory;
mod sqlite;
mod store;
mod tiered;

pub use entry::{CacheEntry, CacheLevel, CorruptEntry, ENVELOPE_VERSION};
pub use memory::MemoryCache;
pub use sqlite::SqliteStore;
pub use store::{MemoryStore, PersistentStore, StoreError};
pub use tiered::{CacheStats, LevelStats, TieredCache};
