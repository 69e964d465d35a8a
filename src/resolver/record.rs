//! Resolved citation records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SourceName;
use crate::parser::Identifier;

/// Number of fields the quality score is computed over.
const EXPECTED_FIELDS: f64 = 8.0;

/// One author, split the way registries report them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub family: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given: Option<String>,
}

impl Author {
    #[must_use]
    pub fn new(family: impl Into<String>, given: Option<String>) -> Self {
        Self {
            family: family.into(),
            given: given.filter(|g| !g.trim().is_empty()),
        }
    }

    /// Parses `Family, Given` or `Given Family` (last token is the family name).
    #[must_use]
    pub fn from_display(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        if let Some((family, given)) = name.split_once(',') {
            let family = family.trim();
            if family.is_empty() {
                return None;
            }
            return Some(Self::new(family, Some(given.trim().to_string())));
        }
        match name.rsplit_once(char::is_whitespace) {
            Some((given, family)) => Some(Self::new(family.trim(), Some(given.trim().to_string()))),
            None => Some(Self::new(name, None)),
        }
    }

    /// `Family, Given` (or just `Family`).
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.given {
            Some(given) => format!("{}, {given}", self.family),
            None => self.family.clone(),
        }
    }
}

/// Bibliographic metadata as recognized from a source payload.
///
/// Fields the parsers do not recognize are kept in `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<Author>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u8>,
    /// Journal, proceedings or book title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, rename = "abstract", skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    /// Entry type as reported by the source (`journal-article`, `article`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Metadata {
    /// Fraction of the expected fields that are present.
    ///
    /// Expected: title, authors, year, container, volume, issue, pages, publisher.
    #[must_use]
    pub fn quality(&self) -> f64 {
        let present = [
            self.title.is_some(),
            !self.authors.is_empty(),
            self.year.is_some(),
            self.container.is_some(),
            self.volume.is_some(),
            self.issue.is_some(),
            self.pages.is_some(),
            self.publisher.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count();
        #[allow(clippy::cast_precision_loss)]
        let present = present as f64;
        present / EXPECTED_FIELDS
    }

    /// Surname of the first author, if any.
    #[must_use]
    pub fn first_author_family(&self) -> Option<&str> {
        self.authors.first().map(|a| a.family.as_str())
    }

    /// True when nothing useful was recognized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.authors.is_empty() && self.year.is_none()
    }
}

/// A citation record produced by one source for one identifier.
///
/// Immutable once built; fields are read through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRecord {
    identifier: Identifier,
    metadata: Metadata,
    source: SourceName,
    fetched_at: DateTime<Utc>,
    quality: f64,
}

impl ResolvedRecord {
    /// Builds a record fetched now.
    #[must_use]
    pub fn new(identifier: Identifier, metadata: Metadata, source: SourceName) -> Self {
        Self::fetched_at(identifier, metadata, source, Utc::now())
    }

    /// Builds a record with an explicit fetch time.
    #[must_use]
    pub fn fetched_at(
        identifier: Identifier,
        metadata: Metadata,
        source: SourceName,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let quality = metadata.quality();
        Self {
            identifier,
            metadata,
            source,
            fetched_at,
            quality,
        }
    }

    #[must_use]
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    #[must_use]
    pub fn source(&self) -> &SourceName {
        &self.source
    }

    #[must_use]
    pub fn fetch_time(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    #[must_use]
    pub fn quality(&self) -> f64 {
        self.quality
    }
}
