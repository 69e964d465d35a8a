//! Citation key generation and per-batch disambiguation.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::resolver::ResolvedRecord;

/// Characters of title or container kept in a key.
const SEGMENT_CHARS: usize = 20;

/// Stand-in for a missing first-author surname.
const ANONYMOUS: &str = "anon";

/// How a base key is built from a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPattern {
    /// `smith2020`
    #[default]
    AuthorYear,
    /// `smitharrayprogrammingwith2020`
    AuthorTitleYear,
    /// `nature2020`
    JournalYear,
}

impl KeyPattern {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthorYear => "author_year",
            Self::AuthorTitleYear => "author_title_year",
            Self::JournalYear => "journal_year",
        }
    }

    /// Base (not yet unique) key for `record`.
    ///
    /// When the pattern's fields are all missing, the key is `ref` followed by
    /// the first 8 hex digits of the SHA-256 of the identifier.
    #[must_use]
    pub fn base_key(self, record: &ResolvedRecord) -> String {
        let metadata = record.metadata();
        let surname = metadata
            .first_author_family()
            .map(sanitize)
            .unwrap_or_default();
        let year = metadata.year.map(|y| y.to_string()).unwrap_or_default();

        let (informative, key) = match self {
            Self::AuthorYear => (
                !surname.is_empty() || !year.is_empty(),
                format!("{}{year}", or_anonymous(&surname)),
            ),
            Self::AuthorTitleYear => {
                let title = truncated(metadata.title.as_deref());
                (
                    !surname.is_empty() || !title.is_empty() || !year.is_empty(),
                    format!("{}{title}{year}", or_anonymous(&surname)),
                )
            }
            Self::JournalYear => {
                let journal = truncated(metadata.container.as_deref());
                (!journal.is_empty() || !year.is_empty(), format!("{journal}{year}"))
            }
        };

        if informative {
            key
        } else {
            fallback_key(record.identifier().as_str())
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "author_year" => Ok(Self::AuthorYear),
            "author_title_year" | "first_author_title_year" => Ok(Self::AuthorTitleYear),
            "journal_year" => Ok(Self::JournalYear),
            other => Err(format!(
                "unknown key pattern '{other}' (expected author_year, author_title_year or journal_year)"
            )),
        }
    }
}

/// Lowercase ASCII letters and digits only.
fn sanitize(text: &str) -> String {
    text.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn truncated(text: Option<&str>) -> String {
    text.map(sanitize)
        .unwrap_or_default()
        .chars()
        .take(SEGMENT_CHARS)
        .collect()
}

fn or_anonymous(surname: &str) -> &str {
    if surname.is_empty() { ANONYMOUS } else { surname }
}

fn fallback_key(identifier: &str) -> String {
    let digest = Sha256::digest(identifier.as_bytes());
    let hex: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("ref{hex}")
}

/// `a`..`z`, then `aa`, `ab`, ... for `n` = 1, 2, ...
fn suffix(mut n: usize) -> String {
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push(b'a' + u8::try_from(n % 26).unwrap_or(0));
        n /= 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Hands out keys that are unique among everything it has handed out.
///
/// One instance belongs to one batch run.
#[derive(Debug, Default)]
pub struct KeyDisambiguator {
    pattern: KeyPattern,
    used: HashSet<String>,
}

impl KeyDisambiguator {
    #[must_use]
    pub fn new(pattern: KeyPattern) -> Self {
        Self {
            pattern,
            used: HashSet::new(),
        }
    }

    #[must_use]
    pub fn pattern(&self) -> KeyPattern {
        self.pattern
    }

    /// Assigns a key to `record`: the base key, or the base key plus the first
    /// free suffix.
    pub fn assign(&mut self, record: &ResolvedRecord) -> String {
        self.claim(self.pattern.base_key(record))
    }

    /// Registers `base` (or its first free suffixed form) as used.
    pub fn claim(&mut self, base: String) -> String {
        if !self.used.contains(&base) {
            self.used.insert(base.clone());
            return base;
        }
        let mut n = 1;
        let key = loop {
            let candidate = format!("{base}{}", suffix(n));
            if !self.used.contains(&candidate) {
                break candidate;
            }
            n += 1;
        };
        self.used.insert(key.clone());
        key
    }

    /// Forgets every assigned key.
    pub fn reset(&mut self) {
        self.used.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.used.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::parser::Identifier;
    use crate::resolver::{Author, Metadata, SourceName};

    fn record(doi: &str, family: Option<&str>, year: Option<i32>) -> ResolvedRecord {
        ResolvedRecord::new(
            Identifier::parse(doi).unwrap(),
            Metadata {
                title: Some("Array Programming with NumPy: A Review".to_string()),
                authors: family
                    .map(|f| vec![Author::new(f, None)])
                    .unwrap_or_default(),
                year,
                container: Some("Nature Communications Biology Letters".to_string()),
                ..Metadata::default()
            },
            SourceName::new("crossref"),
        )
    }

    // ==================== Base Key Tests ====================

    #[test]
    fn test_author_year_key() {
        let key = KeyPattern::AuthorYear.base_key(&record("10.1234/a", Some("O'Brien-Smith"), Some(2020)));
        assert_eq!(key, "obriensmith2020");
    }

    #[test]
    fn test_author_title_year_key_truncates_title() {
        let key = KeyPattern::AuthorTitleYear.base_key(&record("10.1234/a", Some("Harris"), Some(2020)));
        assert_eq!(key, "harrisarrayprogrammingwith2020");
    }

    #[test]
    fn test_journal_year_key() {
        let key = KeyPattern::JournalYear.base_key(&record("10.1234/a", None, Some(2019)));
        assert_eq!(key, "naturecommunications2019");
    }

    #[test]
    fn test_missing_author_with_year_is_anon() {
        let key = KeyPattern::AuthorYear.base_key(&record("10.1234/a", None, Some(2021)));
        assert_eq!(key, "anon2021");
    }

    #[test]
    fn test_missing_author_and_year_falls_back_to_hash() {
        let first = KeyPattern::AuthorYear.base_key(&record("10.1234/a", None, None));
        let again = KeyPattern::AuthorYear.base_key(&record("10.1234/a", None, None));
        let other = KeyPattern::AuthorYear.base_key(&record("10.1234/b", None, None));

        assert!(first.starts_with("ref"));
        assert_eq!(first.len(), 11);
        assert!(first[3..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(first, again);
        assert_ne!(first, other);
    }

    #[test]
    fn test_key_pattern_from_str() {
        assert_eq!("author-year".parse::<KeyPattern>().unwrap(), KeyPattern::AuthorYear);
        assert_eq!(
            "first_author_title_year".parse::<KeyPattern>().unwrap(),
            KeyPattern::AuthorTitleYear
        );
        assert!("title".parse::<KeyPattern>().is_err());
    }

    // ==================== Disambiguation Tests ====================

    #[test]
    fn test_two_smith_2020_papers() {
        let mut keys = KeyDisambiguator::new(KeyPattern::AuthorYear);
        assert_eq!(keys.assign(&record("10.1234/a", Some("Smith"), Some(2020))), "smith2020");
        assert_eq!(keys.assign(&record("10.1234/b", Some("Smith"), Some(2020))), "smith2020a");
        assert_eq!(keys.assign(&record("10.1234/c", Some("Smith"), Some(2020))), "smith2020b");
    }

    #[test]
    fn test_suffixes_continue_past_z() {
        let mut keys = KeyDisambiguator::default();
        let assigned: Vec<String> = (0..30).map(|_| keys.claim("doe2020".to_string())).collect();
        assert_eq!(assigned[26], "doe2020z");
        assert_eq!(assigned[27], "doe2020aa");
        assert_eq!(assigned[28], "doe2020ab");
        assert_eq!(keys.len(), 30);
    }

    #[test]
    fn test_suffix_does_not_collide_with_natural_key() {
        let mut keys = KeyDisambiguator::default();
        keys.claim("smith2020a".to_string());
        keys.claim("smith2020".to_string());
        assert_eq!(keys.claim("smith2020".to_string()), "smith2020b");
    }

    #[test]
    fn test_reset_clears_used_keys() {
        let mut keys = KeyDisambiguator::default();
        keys.claim("smith2020".to_string());
        keys.reset();
        assert!(keys.is_empty());
        assert_eq!(keys.claim("smith2020".to_string()), "smith2020");
    }

    #[test]
    fn test_suffix_sequence() {
        assert_eq!(suffix(1), "a");
        assert_eq!(suffix(26), "z");
        assert_eq!(suffix(27), "aa");
        assert_eq!(suffix(52), "az");
        assert_eq!(suffix(53), "ba");
    }
}
