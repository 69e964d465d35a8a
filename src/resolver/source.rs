//! Upstream source descriptions: names, URL templates, payload formats.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::record::Metadata;
use super::{bibtex, crossref, csl};
use crate::parser::Identifier;

/// Placeholder substituted with the (path-encoded) identifier.
pub const DOI_PLACEHOLDER: &str = "{doi}";

/// Placeholder substituted with the contact email, or removed.
pub const MAILTO_PLACEHOLDER: &str = "{mailto}";

/// Tag identifying an upstream registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceName(String);

impl SourceName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A payload that answered 2xx but could not be turned into metadata.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed payload: {reason}")]
    Structure { reason: String },

    #[error("payload has no recognizable bibliographic fields")]
    Empty,
}

impl PayloadError {
    pub(crate) fn structure(reason: impl Into<String>) -> Self {
        Self::Structure {
            reason: reason.into(),
        }
    }
}

/// How a source's response body is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadFormat {
    /// Crossref REST `works` envelope: `{"status": "ok", "message": {...}}`.
    CrossrefJson,
    /// CSL-JSON (DataCite, doi.org content negotiation).
    CslJson,
    /// A single BibTeX entry.
    Bibtex,
}

impl PayloadFormat {
    /// Accept header to send for this format.
    #[must_use]
    pub fn accept(self) -> &'static str {
        match self {
            Self::CrossrefJson => "application/json",
            Self::CslJson => "application/vnd.citationstyles.csl+json",
            Self::Bibtex => "application/x-bibtex",
        }
    }

    /// Parses a response body.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError`] when the body is structurally malformed or
    /// carries no title, author or year.
    pub fn parse(self, body: &str) -> Result<Metadata, PayloadError> {
        let metadata = match self {
            Self::CrossrefJson => crossref::parse(body)?,
            Self::CslJson => csl::parse(body)?,
            Self::Bibtex => bibtex::parse(body)?,
        };
        if metadata.is_empty() {
            return Err(PayloadError::Empty);
        }
        Ok(metadata)
    }
}

impl FromStr for PayloadFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "crossref-json" | "crossref" => Ok(Self::CrossrefJson),
            "csl-json" | "csl" => Ok(Self::CslJson),
            "bibtex" => Ok(Self::Bibtex),
            other => Err(format!(
                "unknown payload format '{other}' (expected crossref-json, csl-json or bibtex)"
            )),
        }
    }
}

/// Configuration of one upstream source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: SourceName,
    /// URL with a `{doi}` placeholder and optionally `{mailto}`.
    pub url_template: String,
    pub format: PayloadFormat,
    /// Requests allowed per `window`; zero disables throttling.
    pub rate: u32,
    #[serde(with = "duration_millis")]
    pub window: Duration,
}

impl SourceConfig {
    #[must_use]
    pub fn new(name: &str, url_template: impl Into<String>, format: PayloadFormat) -> Self {
        Self {
            name: SourceName::new(name),
            url_template: url_template.into(),
            format,
            rate: 10,
            window: Duration::from_secs(1),
        }
    }

    #[must_use]
    pub fn with_rate(mut self, rate: u32, window: Duration) -> Self {
        self.rate = rate;
        self.window = window;
        self
    }

    /// Crossref REST API.
    #[must_use]
    pub fn crossref() -> Self {
        Self::new(
            "crossref",
            "https://api.crossref.org/works/{doi}?mailto={mailto}",
            PayloadFormat::CrossrefJson,
        )
        .with_rate(10, Duration::from_secs(1))
    }

    /// DataCite content negotiation endpoint.
    #[must_use]
    pub fn datacite() -> Self {
        Self::new(
            "datacite",
            "https://api.datacite.org/application/vnd.citationstyles.csl+json/{doi}",
            PayloadFormat::CslJson,
        )
        .with_rate(5, Duration::from_secs(1))
    }

    /// doi.org content negotiation, asking for BibTeX.
    #[must_use]
    pub fn doi_org() -> Self {
        Self::new("doi.org", "https://doi.org/{doi}", PayloadFormat::Bibtex)
            .with_rate(5, Duration::from_secs(1))
    }

    /// Default order: Crossref, DataCite, doi.org.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![Self::crossref(), Self::datacite(), Self::doi_org()]
    }

    /// Looks up a built-in source by name.
    #[must_use]
    pub fn builtin(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "crossref" => Some(Self::crossref()),
            "datacite" => Some(Self::datacite()),
            "doi.org" | "doi" => Some(Self::doi_org()),
            _ => None,
        }
    }

    /// Expands the URL template for `identifier`.
    ///
    /// Each path segment of the identifier is percent-encoded; slashes are
    /// kept. A `mailto` query parameter whose value is missing is dropped.
    #[must_use]
    pub fn url_for(&self, identifier: &Identifier, mailto: Option<&str>) -> String {
        let encoded = identifier
            .as_str()
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let url = self.url_template.replace(DOI_PLACEHOLDER, &encoded);

        match mailto.filter(|m| !m.trim().is_empty()) {
            Some(mailto) => url.replace(MAILTO_PLACEHOLDER, &urlencoding::encode(mailto.trim())),
            None => strip_mailto_param(&url),
        }
    }

    /// Checks the template and name.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the source cannot be used.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.as_str().trim().is_empty() {
            return Err("source name must not be empty".to_string());
        }
        if !self.url_template.contains(DOI_PLACEHOLDER) {
            return Err(format!(
                "URL template for '{}' must contain {DOI_PLACEHOLDER}",
                self.name
            ));
        }
        if !(self.url_template.starts_with("http://") || self.url_template.starts_with("https://"))
        {
            return Err(format!(
                "URL template for '{}' must start with http:// or https://",
                self.name
            ));
        }
        Ok(())
    }
}

/// Removes `mailto={mailto}` from a query string, tidying separators.
fn strip_mailto_param(url: &str) -> String {
    let param = format!("mailto={MAILTO_PLACEHOLDER}");
    let url = url
        .replace(&format!("&{param}"), "")
        .replace(&format!("{param}&"), "")
        .replace(&param, "");
    let url = url.strip_suffix('?').unwrap_or(&url).to_string();
    url.replace(MAILTO_PLACEHOLDER, "")
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        #[allow(clippy::cast_possible_truncation)]
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
