//! BibTeX payloads (doi.org content negotiation with `Accept: application/x-bibtex`).

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::record::{Author, Metadata};
use super::source::PayloadError;

#[allow(clippy::expect_used)]
static YEAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:1[5-9]|20)\d{2}\b").expect("bibtex year regex is valid"));
#[allow(clippy::expect_used)]
static AUTHOR_SPLIT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+and\s+").expect("bibtex author split regex is valid"));

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Parses the first `@type{key, ...}` entry in `body`.
pub(crate) fn parse(body: &str) -> Result<Metadata, PayloadError> {
    let entry = first_entry(body)?;
    let mut fields = parse_fields(entry.fields).map_err(PayloadError::structure)?;

    let mut take = |name: &str| fields.remove(name).filter(|v| !v.is_empty());

    let authors = take("author")
        .map(|value| {
            AUTHOR_SPLIT_PATTERN
                .split(&value)
                .filter_map(Author::from_display)
                .collect()
        })
        .unwrap_or_default();

    let mut metadata = Metadata {
        title: take("title"),
        authors,
        year: take("year")
            .and_then(|v| YEAR_PATTERN.find(&v).and_then(|m| m.as_str().parse().ok())),
        month: take("month").and_then(|v| parse_month(&v)),
        container: take("journal").or_else(|| take("booktitle")),
        volume: take("volume"),
        issue: take("number"),
        pages: take("pages").map(|p| p.replace("--", "-")),
        publisher: take("publisher"),
        issn: take("issn"),
        isbn: take("isbn"),
        url: take("url"),
        abstract_text: take("abstract"),
        kind: Some(entry.entry_type),
        extra: BTreeMap::new(),
    };
    metadata.extra = fields
        .into_iter()
        .map(|(name, value)| (name, Value::String(value)))
        .collect();
    Ok(metadata)
}

struct RawEntry<'a> {
    entry_type: String,
    fields: &'a str,
}

/// Locates the first entry and splits off its type and field list.
fn first_entry(body: &str) -> Result<RawEntry<'_>, PayloadError> {
    let Some(at_pos) = body.find('@') else {
        return Err(PayloadError::structure("missing '@type{...}' entry"));
    };
    let after_at = &body[at_pos + 1..];
    let Some(open) = after_at.find('{') else {
        return Err(PayloadError::structure("missing '{' after entry type"));
    };
    let entry_type = after_at[..open].trim().to_ascii_lowercase();
    if entry_type.is_empty() || !entry_type.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(PayloadError::structure(format!(
            "invalid entry type '{entry_type}'"
        )));
    }

    let inner = &after_at[open + 1..];
    let close = matching_brace(inner)
        .ok_or_else(|| PayloadError::structure("unbalanced braces (entry never closed)"))?;
    let inner = &inner[..close];

    let Some((key, fields)) = inner.split_once(',') else {
        return Err(PayloadError::structure("missing citation key or field list"));
    };
    if key.trim().is_empty() {
        return Err(PayloadError::structure("empty citation key"));
    }

    Ok(RawEntry { entry_type, fields })
}

/// Index of the `}` closing an entry whose opening brace was just consumed.
fn matching_brace(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut escape = false;
    for (index, ch) in text.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' => escape = true,
            '"' if depth == 0 => in_quotes = !in_quotes,
            '{' if !in_quotes => depth += 1,
            '}' if !in_quotes => {
                if depth == 0 {
                    return Some(index);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

/// Splits `name = value` pairs at top-level commas. First value wins per field.
fn parse_fields(input: &str) -> Result<BTreeMap<String, String>, String> {
    let mut pairs = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut escape = false;

    for ch in input.chars() {
        if escape {
            current.push(ch);
            escape = false;
            continue;
        }
        if ch == '\\' {
            current.push(ch);
            escape = true;
            continue;
        }
        if ch == '"' && depth == 0 {
            in_quotes = !in_quotes;
        } else if !in_quotes {
            if ch == '{' {
                depth += 1;
            } else if ch == '}' {
                if depth == 0 {
                    return Err("closing brace without matching opening brace".to_string());
                }
                depth -= 1;
            } else if ch == ',' && depth == 0 {
                let segment = current.trim();
                if !segment.is_empty() {
                    pairs.push(segment.to_string());
                }
                current.clear();
                continue;
            }
        }
        current.push(ch);
    }

    if in_quotes {
        return Err("unterminated quoted value".to_string());
    }
    if depth != 0 {
        return Err("unbalanced braces in field values".to_string());
    }
    let tail = current.trim();
    if !tail.is_empty() {
        pairs.push(tail.to_string());
    }

    let mut fields = BTreeMap::new();
    for pair in pairs {
        let Some((name, value_raw)) = pair.split_once('=') else {
            return Err(format!("missing '=' in field segment `{pair}`"));
        };
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err("empty field name".to_string());
        }
        fields.entry(name).or_insert_with(|| strip_value(value_raw));
    }
    Ok(fields)
}

/// Removes outer delimiters and inner case-protection braces.
fn strip_value(value: &str) -> String {
    let trimmed = value.trim();
    let inner = if (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2)
    {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    };
    let unbraced: String = inner.chars().filter(|c| *c != '{' && *c != '}').collect();
    unbraced
        .replace("\\\"", "\"")
        .replace("\\&", "&")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_month(value: &str) -> Option<u8> {
    let lowered = value.trim().to_ascii_lowercase();
    if let Ok(number) = lowered.parse::<u8>() {
        return (1..=12).contains(&number).then_some(number);
    }
    let prefix = lowered.get(..3)?;
    MONTHS
        .iter()
        .position(|m| *m == prefix)
        .and_then(|i| u8::try_from(i + 1).ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const DOI_ORG_BIBTEX: &str = " @article{Harris_2020, title={Array programming with {NumPy}}, volume={585}, ISSN={1476-4687}, url={http://dx.doi.org/10.1038/s41586-020-2649-2}, DOI={10.1038/s41586-020-2649-2}, number={7825}, journal={Nature}, publisher={Springer Science and Business Media LLC}, author={Harris, Charles R. and Millman, K. Jarrod and van der Walt, Stéfan J.}, year={2020}, month=sep, pages={357--362} }";

    #[test]
    fn test_parse_doi_org_entry() {
        let metadata = parse(DOI_ORG_BIBTEX).unwrap();
        assert_eq!(metadata.title.as_deref(), Some("Array programming with NumPy"));
        assert_eq!(metadata.authors.len(), 3);
        assert_eq!(metadata.authors[0].family, "Harris");
        assert_eq!(metadata.authors[2].family, "van der Walt");
        assert_eq!(metadata.year, Some(2020));
        assert_eq!(metadata.month, Some(9));
        assert_eq!(metadata.container.as_deref(), Some("Nature"));
        assert_eq!(metadata.issue.as_deref(), Some("7825"));
        assert_eq!(metadata.pages.as_deref(), Some("357-362"));
        assert_eq!(metadata.kind.as_deref(), Some("article"));
        assert!((metadata.quality() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_keeps_unrecognized_fields_as_extra() {
        let metadata = parse(DOI_ORG_BIBTEX).unwrap();
        assert_eq!(metadata.extra["doi"], "10.1038/s41586-020-2649-2");
        assert!(!metadata.extra.contains_key("title"));
    }

    #[test]
    fn test_parse_quoted_values_and_booktitle() {
        let body = r#"@inproceedings{k, title = "Quoted \"Title\"", booktitle = {Proc. X}, year = 1999, author = {Jane Doe}}"#;
        let metadata = parse(body).unwrap();
        assert_eq!(metadata.title.as_deref(), Some("Quoted \"Title\""));
        assert_eq!(metadata.container.as_deref(), Some("Proc. X"));
        assert_eq!(metadata.year, Some(1999));
        assert_eq!(metadata.authors[0].family, "Doe");
    }

    #[test]
    fn test_parse_rejects_html() {
        assert!(parse("<html><body>DOI Not Found</body></html>").is_err());
    }

    #[test]
    fn test_parse_rejects_unbalanced_entry() {
        let err = parse("@article{k, title={Open").unwrap_err();
        assert!(err.to_string().contains("unbalanced"));
    }

    #[test]
    fn test_parse_rejects_missing_key() {
        assert!(parse("@article{ , title={T}}").is_err());
        assert!(parse("@article{onlykey}").is_err());
    }

    #[test]
    fn test_parse_month_forms() {
        assert_eq!(parse_month("sep"), Some(9));
        assert_eq!(parse_month("September"), Some(9));
        assert_eq!(parse_month("3"), Some(3));
        assert_eq!(parse_month("13"), None);
        assert_eq!(parse_month("xx"), None);
    }
}
