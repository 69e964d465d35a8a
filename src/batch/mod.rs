//! Batch resolution: validation, bounded workers, cache, keys, report.
//!
//! - [`BatchCoordinator`] - runs one batch against a [`Resolve`](crate::resolver::Resolve)
//!   implementation and a [`TieredCache`](crate::cache::TieredCache)
//! - [`BatchResult`] - per-position outcomes plus aggregate counters; resolved
//!   entries describing the same work as an earlier entry carry `duplicate_of`

mod coordinator;
mod duplicates;
mod report;

pub use coordinator::{BatchCoordinator, ProgressCallback};
pub use report::{BatchEntry, BatchOutcome, BatchResult, BatchStats};
