//! Failure classification shared by the pool, the resolver and the batch report.
//!
//! Every per-identifier problem ends up as a [`ResolutionError`] carrying the
//! [`FailureRecord`]s of each source that was tried. These serialize to
//! `{kind, message, identifier, failures, timestamp}` for downstream consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resolver::SourceName;

/// What went wrong, at the granularity callers act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Input is not a valid identifier. Never reaches the network.
    Validation,
    /// Source answered 404/410: it does not know this identifier.
    NotFound,
    /// Source rejected the request (400, 401, 403, other 4xx).
    Invalid,
    /// Source answered 429 at least once.
    RateLimited,
    /// Request did not complete within the fetch timeout.
    Timeout,
    /// Source kept answering 5xx.
    ServerError,
    /// Connection could not be established or was dropped.
    Network,
    /// Source answered 2xx with a payload that could not be parsed.
    MalformedPayload,
    /// Batch was cancelled or hit its deadline.
    Cancelled,
    /// A worker failed unexpectedly.
    Internal,
}

impl FailureKind {
    /// Short label used in compact failure summaries (`crossref: 404`).
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Validation => "invalid identifier",
            Self::NotFound => "not found",
            Self::Invalid => "rejected",
            Self::RateLimited => "rate limited",
            Self::Timeout => "timeout",
            Self::ServerError => "server error",
            Self::Network => "network error",
            Self::MalformedPayload => "malformed payload",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal error",
        }
    }

    /// User-facing explanation of this kind of failure.
    #[must_use]
    pub fn descriptor(self) -> FailureDescriptor {
        match self {
            Self::Validation => FailureDescriptor {
                what: "Input is not a DOI",
                why: "The input could not be normalized into the 10.<registrant>/<suffix> form.",
                fix: "Check the input for typos or extra text and retry with a bare DOI.",
            },
            Self::NotFound | Self::Invalid => FailureDescriptor {
                what: "No registry knows this DOI",
                why: "Every configured source rejected the identifier or reported it missing.",
                fix: "Verify the DOI at https://doi.org and check for a stale or mistyped suffix.",
            },
            Self::RateLimited => FailureDescriptor {
                what: "Registry rate limit reached",
                why: "A source answered HTTP 429 and asked the client to slow down.",
                fix: "Lower the request rate or concurrency, or set a contact email for the polite pool.",
            },
            Self::Timeout | Self::Network | Self::ServerError => FailureDescriptor {
                what: "Registry unreachable",
                why: "Connectivity problems or server errors persisted after retries.",
                fix: "Check connectivity, then rerun; cached results are kept.",
            },
            Self::MalformedPayload => FailureDescriptor {
                what: "Registry returned unreadable metadata",
                why: "A source answered successfully but its payload could not be parsed.",
                fix: "Retry later or reorder sources so a different registry is asked first.",
            },
            Self::Cancelled => FailureDescriptor {
                what: "Resolution cancelled",
                why: "The batch was cancelled or reached its overall timeout before this item finished.",
                fix: "Rerun with a longer batch timeout; finished items are cached.",
            },
            Self::Internal => FailureDescriptor {
                what: "Unhandled failure",
                why: "A worker failed unexpectedly while resolving this item.",
                fix: "Inspect logs with -v and rerun.",
            },
        }
    }
}

/// What/why/fix triple for showing a failure to a person.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureDescriptor {
    pub what: &'static str,
    pub why: &'static str,
    pub fix: &'static str,
}

/// Outcome of asking one source about one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub source: SourceName,
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    #[must_use]
    pub fn new(source: SourceName, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            source,
            kind,
            message: message.into(),
            status: None,
            attempts: 0,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: Option<u16>) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// `crossref: 404` or `doi.org: timeout`.
    #[must_use]
    pub fn summary(&self) -> String {
        match self.status {
            Some(status) => format!("{}: {status}", self.source),
            None => format!("{}: {}", self.source, self.kind.label()),
        }
    }
}

/// Structured per-identifier failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?} for '{identifier}': {message}")]
pub struct ResolutionError {
    pub kind: FailureKind,
    pub message: String,
    /// The identifier as normalized, or the raw input when validation failed.
    pub identifier: String,
    pub failures: Vec<FailureRecord>,
    pub timestamp: DateTime<Utc>,
}

impl ResolutionError {
    #[must_use]
    pub fn new(kind: FailureKind, identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            identifier: identifier.into(),
            failures: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Builds the error for an identifier every source failed on.
    ///
    /// The message joins per-source summaries; the kind is derived from them.
    #[must_use]
    pub fn from_failures(identifier: impl Into<String>, failures: Vec<FailureRecord>) -> Self {
        let message = failures
            .iter()
            .map(FailureRecord::summary)
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            kind: aggregate_kind(&failures),
            message,
            identifier: identifier.into(),
            failures,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn validation(raw: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, raw, message)
    }

    #[must_use]
    pub fn cancelled(identifier: impl Into<String>) -> Self {
        Self::new(
            FailureKind::Cancelled,
            identifier,
            "batch cancelled before this identifier finished",
        )
    }

    #[must_use]
    pub fn descriptor(&self) -> FailureDescriptor {
        self.kind.descriptor()
    }
}

/// Collapses per-source outcomes into the top-level kind.
///
/// Cancellation wins, then any 429, then "everyone said not found".
/// Everything else is reported as a network-class failure.
fn aggregate_kind(failures: &[FailureRecord]) -> FailureKind {
    if failures.is_empty() {
        return FailureKind::Internal;
    }
    if failures.iter().any(|f| f.kind == FailureKind::Cancelled) {
        return FailureKind::Cancelled;
    }
    if failures.iter().any(|f| f.kind == FailureKind::RateLimited) {
        return FailureKind::RateLimited;
    }
    if failures
        .iter()
        .all(|f| matches!(f.kind, FailureKind::NotFound | FailureKind::Invalid))
    {
        return FailureKind::NotFound;
    }
    FailureKind::Network
}
