//! Batch results.

use serde::{Deserialize, Serialize};

use crate::failure::{FailureKind, FailureRecord, ResolutionError};
use crate::parser::Identifier;
use crate::resolver::ResolvedRecord;

/// What happened to one input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Resolved {
        identifier: Identifier,
        key: String,
        from_cache: bool,
        record: ResolvedRecord,
        /// Sources that failed before one answered. Empty for cache hits.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        failures: Vec<FailureRecord>,
        /// Position of an earlier entry describing the same work.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duplicate_of: Option<usize>,
    },
    Failed {
        error: ResolutionError,
    },
}

/// One input position and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Zero-based index into the submitted inputs.
    pub position: usize,
    /// The input exactly as submitted.
    pub input: String,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

impl BatchEntry {
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self.outcome, BatchOutcome::Resolved { .. })
    }

    /// Assigned citation key, for resolved entries.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match &self.outcome {
            BatchOutcome::Resolved { key, .. } => Some(key),
            BatchOutcome::Failed { .. } => None,
        }
    }

    #[must_use]
    pub fn record(&self) -> Option<&ResolvedRecord> {
        match &self.outcome {
            BatchOutcome::Resolved { record, .. } => Some(record),
            BatchOutcome::Failed { .. } => None,
        }
    }

    /// Per-source failures: those before the answering source for resolved
    /// entries, or every source tried for failed ones.
    #[must_use]
    pub fn failures(&self) -> &[FailureRecord] {
        match &self.outcome {
            BatchOutcome::Resolved { failures, .. } => failures,
            BatchOutcome::Failed { error } => &error.failures,
        }
    }

    #[must_use]
    pub fn duplicate_of(&self) -> Option<usize> {
        match &self.outcome {
            BatchOutcome::Resolved { duplicate_of, .. } => *duplicate_of,
            BatchOutcome::Failed { .. } => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&ResolutionError> {
        match &self.outcome {
            BatchOutcome::Resolved { .. } => None,
            BatchOutcome::Failed { error } => Some(error),
        }
    }
}

/// Aggregate counters. `attempted == succeeded + failed` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cache_hits: usize,
    /// Resolved entries flagged as the same work as an earlier entry.
    #[serde(default)]
    pub duplicates: usize,
    pub elapsed_ms: u64,
}

/// Everything a batch run produced, ordered by input position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub entries: Vec<BatchEntry>,
    pub stats: BatchStats,
    /// True when the run was cancelled or hit its deadline.
    pub cancelled: bool,
}

impl BatchResult {
    pub(crate) fn new(entries: Vec<BatchEntry>, elapsed_ms: u64, cancelled: bool) -> Self {
        let succeeded = entries.iter().filter(|e| e.is_resolved()).count();
        let cache_hits = entries
            .iter()
            .filter(|e| matches!(e.outcome, BatchOutcome::Resolved { from_cache: true, .. }))
            .count();
        let duplicates = entries.iter().filter(|e| e.duplicate_of().is_some()).count();
        let stats = BatchStats {
            attempted: entries.len(),
            succeeded,
            failed: entries.len() - succeeded,
            cache_hits,
            duplicates,
            elapsed_ms,
        };
        Self {
            entries,
            stats,
            cancelled,
        }
    }

    pub fn resolved(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries.iter().filter(|e| e.is_resolved())
    }

    pub fn failed(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries.iter().filter(|e| !e.is_resolved())
    }

    /// Failures of the given kind.
    pub fn failed_with(&self, kind: FailureKind) -> impl Iterator<Item = &BatchEntry> {
        self.failed()
            .filter(move |e| e.error().is_some_and(|error| error.kind == kind))
    }

    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.stats.failed == 0
    }
}
