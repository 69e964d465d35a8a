//! DOI normalization, validation, and detection in free text.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::error::{MAX_IDENTIFIER_LENGTH, ValidationError};

/// Shape every normalized identifier must match.
#[allow(clippy::expect_used)]
static DOI_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^10\.\d{4,9}(?:\.\d+)*/\S+$").expect("DOI shape regex is valid") // Static pattern, safe to panic
});

/// Bare DOIs in running text: `10.XXXX/suffix`.
/// The preceding-character check (to reject IP-like patterns) is done in code
/// since the `regex` crate doesn't support lookbehind.
#[allow(clippy::expect_used)]
static DOI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"10\.\d{4,9}(?:\.\d+)*/[^\s<>"'\]]+"#).expect("DOI regex is valid")
});

/// DOI URLs: `https://doi.org/10.XXXX/suffix` or `https://dx.doi.org/...`
#[allow(clippy::expect_used)]
static DOI_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)https?://(?:dx\.)?doi\.org/10\.\d{4,9}(?:\.\d+)*/[^\s<>"'\]]+"#)
        .expect("DOI URL regex is valid")
});

/// `doi:` prefixed DOIs: `DOI: 10.XXXX/suffix`
#[allow(clippy::expect_used)]
static DOI_PREFIX_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)doi:\s*10\.\d{4,9}(?:\.\d+)*/[^\s<>"'\]]+"#)
        .expect("DOI prefix regex is valid")
});

const URL_PREFIXES: [&str; 6] = [
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi.org/",
    "dx.doi.org/",
];

const TRAILING_PUNCTUATION: [char; 4] = ['.', ',', ';', ':'];

/// A normalized, validated DOI.
///
/// Construction goes through [`Identifier::parse`], so every value of this type
/// is lowercase, prefix-free, percent-decoded and shaped like
/// `10.<registrant>/<suffix>`.
///
/// ```
/// use bibresolve_core::Identifier;
///
/// let id = Identifier::parse("https://doi.org/10.1038/NATURE12373.").unwrap();
/// assert_eq!(id.as_str(), "10.1038/nature12373");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Normalizes and validates a raw input.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the input is empty, too long, or not a DOI.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let normalized = normalize(raw)?;
        validate(&normalized)?;
        Ok(Self(normalized))
    }

    /// The normalized DOI string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The registrant prefix (`10.1234`).
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.0.split_once('/').map_or(self.0.as_str(), |(prefix, _)| prefix)
    }

    /// Everything after the first slash.
    #[must_use]
    pub fn suffix(&self) -> &str {
        self.0.split_once('/').map_or("", |(_, suffix)| suffix)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Identifier {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identifier {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

/// Strips URL and `doi:` prefixes, lowercases, percent-decodes and trims
/// trailing prose punctuation.
fn normalize(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::too_long(trimmed));
    }

    let lowered = trimmed.to_lowercase();
    let mut doi = lowered.as_str();

    for prefix in URL_PREFIXES {
        if let Some(stripped) = doi.strip_prefix(prefix) {
            doi = stripped;
            break;
        }
    }
    if let Some(stripped) = doi.strip_prefix("doi:") {
        doi = stripped.trim_start();
    }

    let decoded = match urlencoding::decode(doi) {
        Ok(decoded) => decoded.trim().to_string(),
        Err(_) => doi.trim().to_string(),
    };
    let cleaned = strip_trailing(decoded);

    if cleaned.is_empty() {
        return Err(ValidationError::Empty);
    }
    Ok(cleaned)
}

/// Removes trailing `.,;:` and unbalanced closing parentheses, in any order.
///
/// DOIs can legitimately contain parentheses (`10.1002/(SICI)1097-4636`), so a
/// trailing `)` is only dropped when the suffix has more closers than openers.
fn strip_trailing(mut doi: String) -> String {
    loop {
        if doi.ends_with(TRAILING_PUNCTUATION) {
            doi.pop();
            continue;
        }
        if doi.ends_with(')') {
            let suffix = doi.split_once('/').map_or(doi.as_str(), |(_, s)| s);
            let closers = suffix.chars().filter(|&c| c == ')').count();
            let openers = suffix.chars().filter(|&c| c == '(').count();
            if closers > openers {
                doi.pop();
                continue;
            }
        }
        return doi;
    }
}

/// Checks a normalized DOI, giving the most specific reason available.
fn validate(doi: &str) -> Result<(), ValidationError> {
    if !doi.starts_with("10.") {
        return Err(ValidationError::invalid_doi(
            doi,
            "DOI must start with '10.'",
        ));
    }

    let Some((registrant, suffix)) = doi[3..].split_once('/') else {
        return Err(ValidationError::missing_suffix(doi));
    };

    let mut segments = registrant.split('.');
    let first = segments.next().unwrap_or_default();
    if !(4..=9).contains(&first.len()) || !first.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::invalid_doi(
            doi,
            "registrant code must have 4 to 9 digits",
        ));
    }
    if segments.any(|s| s.is_empty() || !s.chars().all(|c| c.is_ascii_digit())) {
        return Err(ValidationError::invalid_doi(
            doi,
            "registrant sub-codes must be numeric",
        ));
    }

    if suffix.is_empty() {
        return Err(ValidationError::missing_suffix(doi));
    }
    if !DOI_SHAPE.is_match(doi) {
        return Err(ValidationError::invalid_doi(
            doi,
            "suffix must not contain whitespace",
        ));
    }

    Ok(())
}

/// Finds DOI candidates in free text, in order of appearance.
///
/// Candidates are returned raw (with any `doi:` or URL prefix) so that each one
/// can be validated through [`Identifier::parse`] and reported individually.
///
/// ```
/// use bibresolve_core::parser::extract_dois;
///
/// let found = extract_dois("See doi:10.1234/abc and https://doi.org/10.5555/xyz.");
/// assert_eq!(found, vec!["doi:10.1234/abc", "https://doi.org/10.5555/xyz."]);
/// ```
#[tracing::instrument(skip(input), fields(input_len = input.len()))]
#[must_use]
pub fn extract_dois(input: &str) -> Vec<&str> {
    let mut found: Vec<(usize, usize)> = Vec::new();

    // Most specific patterns first so bare matches inside them are skipped
    for pattern in [&*DOI_URL_PATTERN, &*DOI_PREFIX_PATTERN] {
        for m in pattern.find_iter(input) {
            if overlaps(&found, m.start(), m.end()) {
                continue;
            }
            trace!(raw = %m.as_str(), "found prefixed DOI candidate");
            found.push((m.start(), m.end()));
        }
    }

    for m in DOI_PATTERN.find_iter(input) {
        if overlaps(&found, m.start(), m.end()) {
            continue;
        }
        // Reject IP-like patterns (192.10.1234/24) and version strings (v10.1234/rc1)
        if m.start() > 0 {
            let prev_byte = input.as_bytes()[m.start() - 1];
            if prev_byte.is_ascii_alphanumeric() || prev_byte == b'.' {
                continue;
            }
        }
        trace!(raw = %m.as_str(), "found bare DOI candidate");
        found.push((m.start(), m.end()));
    }

    found.sort_unstable();
    found.into_iter().map(|(start, end)| &input[start..end]).collect()
}

fn overlaps(seen: &[(usize, usize)], start: usize, end: usize) -> bool {
    seen.iter().any(|&(s, e)| start < e && end > s)
}
