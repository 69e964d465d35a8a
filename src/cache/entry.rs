//! The envelope stored in the persistent level.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resolver::ResolvedRecord;

/// Bumped whenever the envelope or record layout changes incompatibly.
pub const ENVELOPE_VERSION: u32 = 1;

/// Which level served a lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLevel {
    /// In-process L1.
    Memory,
    /// Persistent L2.
    #[default]
    Persistent,
}

/// A cached record with its expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub version: u32,
    /// Identifier the entry was written for.
    pub key: String,
    pub record: ResolvedRecord,
    pub expires_at: DateTime<Utc>,
    #[serde(skip)]
    pub level: CacheLevel,
}

/// Why a stored payload could not be used.
#[derive(Debug, Error)]
pub enum CorruptEntry {
    #[error("undecodable cache payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache envelope version {found} (expected {ENVELOPE_VERSION})")]
    Version { found: u32 },

    #[error("cache slot for '{expected}' holds an entry for '{found}'")]
    KeyMismatch { expected: String, found: String },
}

impl CacheEntry {
    /// Wraps `record`, expiring `ttl` from now.
    #[must_use]
    pub fn new(record: ResolvedRecord, ttl: Duration, level: CacheLevel) -> Self {
        let expires_at = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::expiring_at(record, expires_at, level)
    }

    /// Wraps `record` with a known expiry.
    #[must_use]
    pub fn expiring_at(record: ResolvedRecord, expires_at: DateTime<Utc>, level: CacheLevel) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            key: record.identifier().as_str().to_string(),
            record,
            expires_at,
            level,
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Time left before expiry, or `None` once expired.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        (self.expires_at - Utc::now())
            .to_std()
            .ok()
            .filter(|left| !left.is_zero())
    }

    /// Serializes the envelope.
    ///
    /// # Errors
    ///
    /// Fails only if the record holds values JSON cannot represent.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserializes an envelope read from the slot for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CorruptEntry`] when the bytes are not a current envelope for `key`.
    pub fn decode(key: &str, bytes: &[u8]) -> Result<Self, CorruptEntry> {
        let entry: Self = serde_json::from_slice(bytes)?;
        if entry.version != ENVELOPE_VERSION {
            return Err(CorruptEntry::Version {
                found: entry.version,
            });
        }
        if entry.key != key || entry.record.identifier().as_str() != key {
            return Err(CorruptEntry::KeyMismatch {
                expected: key.to_string(),
                found: entry.key,
            });
        }
        Ok(Self {
            level: CacheLevel::Persistent,
            ..entry
        })
    }
}
