//! Error types for the HTTP layer.

use std::time::Duration;

use thiserror::Error;

use crate::failure::FailureKind;

/// Errors surfaced by a single fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Non-success HTTP status.
    #[error("HTTP {status} fetching {url}")]
    Status {
        url: String,
        status: u16,
        /// Parsed Retry-After header, when the server sent one.
        retry_after: Option<Duration>,
    },

    /// Server asked us to slow down (429) at least once and the fetch did not recover.
    #[error("rate limited fetching {url} (last status {last_status:?})")]
    RateLimited { url: String, last_status: Option<u16> },

    /// Request did not finish within the fetch timeout.
    #[error("timeout fetching {url}")]
    Timeout { url: String },

    /// Connection-level failure (DNS, refused, reset, TLS).
    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// URL could not be parsed or has no host.
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Cancellation was observed between attempts.
    #[error("cancelled before fetching {url}")]
    Cancelled { url: String },

    /// HTTP client could not be constructed.
    #[error("HTTP client construction failed: {reason}")]
    Client { reason: String },
}

impl FetchError {
    pub fn status(url: impl Into<String>, status: u16, retry_after: Option<Duration>) -> Self {
        Self::Status {
            url: url.into(),
            status,
            retry_after,
        }
    }

    pub fn rate_limited(url: impl Into<String>, last_status: Option<u16>) -> Self {
        Self::RateLimited {
            url: url.into(),
            last_status,
        }
    }

    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    pub fn client(reason: impl Into<String>) -> Self {
        Self::Client {
            reason: reason.into(),
        }
    }

    /// HTTP status associated with this error, if any.
    #[must_use]
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Maps the error onto the shared failure taxonomy.
    #[must_use]
    #[allow(clippy::match_same_arms)]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Status { status, .. } => match status {
                404 | 410 => FailureKind::NotFound,
                429 => FailureKind::RateLimited,
                400..=499 => FailureKind::Invalid,
                _ => FailureKind::ServerError,
            },
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Network { .. } => FailureKind::Network,
            Self::InvalidUrl { .. } => FailureKind::Invalid,
            Self::Cancelled { .. } => FailureKind::Cancelled,
            Self::Client { .. } => FailureKind::Internal,
        }
    }
}

/// A failed fetch together with how many attempts were made.
#[derive(Debug, Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct FetchFailure {
    #[source]
    pub error: FetchError,
    pub attempts: u32,
}

impl FetchFailure {
    #[must_use]
    pub fn new(error: FetchError, attempts: u32) -> Self {
        Self { error, attempts }
    }

    #[must_use]
    pub fn kind(&self) -> FailureKind {
        self.error.kind()
    }
}
