//! bibresolve Core Library
//!
//! Resolves batches of DOIs into structured citation records. Each
//! identifier is looked up in a two-level cache, then fetched from an
//! ordered list of upstream registries through a throttled, retrying HTTP
//! pool, and finally given a citation key that is unique within the batch.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`parser`] - DOI normalization, validation and extraction from text
//! - [`http`] - Per-source rate limiting, pooled transport with retry
//! - [`resolver`] - Source configuration, payload formats, ordered fallback
//! - [`cache`] - L1 sharded LRU over an L2 persistent store
//! - [`keys`] - Citation key patterns and per-batch disambiguation
//! - [`batch`] - Bounded-concurrency batch runs and their reports
//! - [`engine`] - Builds all of the above from an [`EngineConfig`]
//! - [`db`] - SQLite connection and schema for the persistent cache
//! - [`failure`] - Failure taxonomy shared by every layer
//!
//! # Example
//!
//! ```no_run
//! use bibresolve_core::{Engine, EngineConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::build(EngineConfig::default()).await?;
//! let result = engine
//!     .run(&["10.1038/nature12373", "not-a-doi"], &CancellationToken::new())
//!     .await;
//! println!("{}", serde_json::to_string_pretty(&result)?);
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod failure;
pub mod http;
pub mod keys;
pub mod parser;
pub mod resolver;
mod user_agent;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use batch::{BatchCoordinator, BatchEntry, BatchOutcome, BatchResult, BatchStats, ProgressCallback};
pub use cache::{MemoryStore, PersistentStore, SqliteStore, TieredCache};
pub use config::{BatchConfig, CacheConfig, ConfigError, EngineConfig, PoolConfig};
pub use db::Database;
pub use engine::{Engine, EngineError};
pub use failure::{FailureKind, FailureRecord, ResolutionError};
pub use keys::{KeyDisambiguator, KeyPattern};
pub use parser::{Identifier, ValidationError, extract_dois};
pub use resolver::{
    Metadata, PayloadFormat, Resolution, ResolvedRecord, Resolve, SourceConfig, SourceName, SourceResolver,
};
pub use user_agent::resolver_user_agent;
