//! CSL-JSON payloads (DataCite, doi.org content negotiation).
//!
//! Crossref's `message` object is CSL-shaped too, so [`CslItem`] is shared with
//! the Crossref parser. Registries disagree on whether text fields are strings
//! or single-element arrays and whether numbers are quoted, so the field types
//! here accept both.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::record::{Author, Metadata};
use super::source::PayloadError;

#[allow(clippy::expect_used)]
static MARKUP_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("markup tag regex is valid"));

#[allow(clippy::expect_used)]
static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

/// Text that may arrive as `"x"` or `["x", ...]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum TextOrList {
    Text(String),
    List(Vec<String>),
}

impl TextOrList {
    fn first(&self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text.clone()),
            Self::List(items) => items.first().cloned(),
        }
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    }
}

/// A scalar that may be a string or a number (`"12"` or `12`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl Scalar {
    fn text(&self) -> Option<String> {
        let text = match self {
            Self::Text(text) => text.trim().to_string(),
            Self::Number(number) => number.to_string(),
        };
        (!text.is_empty()).then_some(text)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CslName {
    family: Option<String>,
    given: Option<String>,
    /// Institutional or unparsed names.
    #[serde(alias = "name")]
    literal: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct CslDate {
    date_parts: Option<Vec<Vec<Option<Scalar>>>>,
}

impl CslDate {
    fn part(&self, index: usize) -> Option<i32> {
        self.date_parts
            .as_ref()?
            .first()?
            .get(index)?
            .as_ref()?
            .text()?
            .parse()
            .ok()
    }
}

/// CSL item, tolerant of Crossref and DataCite variations.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct CslItem {
    title: Option<TextOrList>,
    author: Option<Vec<CslName>>,
    issued: Option<CslDate>,
    published: Option<CslDate>,
    published_print: Option<CslDate>,
    published_online: Option<CslDate>,
    container_title: Option<TextOrList>,
    volume: Option<Scalar>,
    issue: Option<Scalar>,
    page: Option<Scalar>,
    publisher: Option<String>,
    #[serde(rename = "ISSN")]
    issn: Option<TextOrList>,
    #[serde(rename = "ISBN")]
    isbn: Option<TextOrList>,
    #[serde(rename = "URL")]
    url: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl CslItem {
    pub(crate) fn into_metadata(self) -> Metadata {
        let date = [
            &self.issued,
            &self.published,
            &self.published_print,
            &self.published_online,
        ]
        .into_iter()
        .flatten()
        .find(|d| d.part(0).is_some());

        let authors = self
            .author
            .unwrap_or_default()
            .into_iter()
            .filter_map(|name| match (name.family, name.literal) {
                (Some(family), _) if !family.trim().is_empty() => {
                    Some(Author::new(family.trim(), name.given.map(|g| g.trim().to_string())))
                }
                (_, Some(literal)) => Author::from_display(&literal),
                _ => None,
            })
            .collect();

        Metadata {
            title: self.title.as_ref().and_then(TextOrList::first).map(|t| clean_text(&t)),
            authors,
            year: date.and_then(|d| d.part(0)),
            month: date
                .and_then(|d| d.part(1))
                .and_then(|m| u8::try_from(m).ok())
                .filter(|m| (1..=12).contains(m)),
            container: self.container_title.as_ref().and_then(TextOrList::first),
            volume: self.volume.as_ref().and_then(Scalar::text),
            issue: self.issue.as_ref().and_then(Scalar::text),
            pages: self.page.as_ref().and_then(Scalar::text),
            publisher: self.publisher.filter(|p| !p.trim().is_empty()),
            issn: self.issn.as_ref().and_then(TextOrList::first),
            isbn: self.isbn.as_ref().and_then(TextOrList::first),
            url: self.url,
            abstract_text: self
                .abstract_text
                .map(|a| clean_text(&a))
                .filter(|a| !a.is_empty()),
            kind: self.kind,
            extra: self.extra,
        }
    }
}

/// Strips JATS/HTML tags and collapses whitespace.
pub(crate) fn clean_text(text: &str) -> String {
    let stripped = MARKUP_TAG.replace_all(text, " ");
    WHITESPACE_RUN.replace_all(stripped.trim(), " ").into_owned()
}

/// Parses a CSL-JSON body. A one-element array is accepted as well.
pub(crate) fn parse(body: &str) -> Result<Metadata, PayloadError> {
    let value: Value = serde_json::from_str(body)?;
    let item = match value {
        Value::Object(_) => value,
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        _ => {
            return Err(PayloadError::structure(
                "expected a CSL-JSON object",
            ));
        }
    };
    let item: CslItem = serde_json::from_value(item)?;
    Ok(item.into_metadata())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn datacite_json() -> Value {
        serde_json::json!({
            "type": "dataset",
            "id": "https://doi.org/10.5061/dryad.abc",
            "DOI": "10.5061/dryad.abc",
            "title": "Data from: Bird migration",
            "author": [
                {"family": "Nguyen", "given": "Anh"},
                {"literal": "Dryad Consortium"}
            ],
            "issued": {"date-parts": [[2019, 7, 3]]},
            "publisher": "Dryad",
            "container-title": "Dryad Digital Repository",
            "version": "2"
        })
    }

    #[test]
    fn test_parse_datacite_csl() {
        let metadata = parse(&datacite_json().to_string()).unwrap();
        assert_eq!(metadata.title.as_deref(), Some("Data from: Bird migration"));
        assert_eq!(metadata.authors.len(), 2);
        assert_eq!(metadata.authors[0].family, "Nguyen");
        assert_eq!(metadata.authors[1].family, "Consortium");
        assert_eq!(metadata.year, Some(2019));
        assert_eq!(metadata.month, Some(7));
        assert_eq!(metadata.publisher.as_deref(), Some("Dryad"));
        assert_eq!(metadata.kind.as_deref(), Some("dataset"));
    }

    #[test]
    fn test_parse_preserves_unknown_fields() {
        let metadata = parse(&datacite_json().to_string()).unwrap();
        assert_eq!(metadata.extra["version"], "2");
        assert_eq!(metadata.extra["DOI"], "10.5061/dryad.abc");
    }

    #[test]
    fn test_parse_accepts_numbers_and_string_date_parts() {
        let body = serde_json::json!({
            "title": ["Numbers"],
            "volume": 12,
            "issue": "3",
            "page": "100-110",
            "issued": {"date-parts": [["2021", "11"]]}
        });
        let metadata = parse(&body.to_string()).unwrap();
        assert_eq!(metadata.volume.as_deref(), Some("12"));
        assert_eq!(metadata.issue.as_deref(), Some("3"));
        assert_eq!(metadata.pages.as_deref(), Some("100-110"));
        assert_eq!(metadata.year, Some(2021));
        assert_eq!(metadata.month, Some(11));
    }

    #[test]
    fn test_parse_single_element_array() {
        let body = serde_json::json!([{"title": "Wrapped"}]);
        let metadata = parse(&body.to_string()).unwrap();
        assert_eq!(metadata.title.as_deref(), Some("Wrapped"));
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(matches!(parse("<html>oops</html>"), Err(PayloadError::Json(_))));
    }

    #[test]
    fn test_parse_rejects_scalar_json() {
        assert!(matches!(parse("42"), Err(PayloadError::Structure { .. })));
    }

    #[test]
    fn test_clean_text_strips_jats() {
        let cleaned = clean_text("<jats:p>We   study\n<jats:italic>things</jats:italic>.</jats:p>");
        assert_eq!(cleaned, "We study things .");
    }
}
