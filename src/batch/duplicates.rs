//! Flags resolved entries that describe the same work twice.

use std::collections::HashMap;

use super::report::{BatchEntry, BatchOutcome};
use crate::parser::Identifier;

/// Lowercased title with whitespace runs collapsed.
fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Points every resolved entry that shares an identifier, or a normalized
/// title and year, with an earlier resolved entry at that earlier position.
///
/// Entries must be in position order. Nothing is removed; returns the number
/// of entries marked.
pub(crate) fn mark_duplicates(entries: &mut [BatchEntry]) -> usize {
    let mut by_identifier: HashMap<Identifier, usize> = HashMap::new();
    let mut by_title_year: HashMap<(String, i32), usize> = HashMap::new();
    let mut marked = 0;

    for entry in entries.iter_mut() {
        let position = entry.position;
        let BatchOutcome::Resolved {
            identifier,
            record,
            duplicate_of,
            ..
        } = &mut entry.outcome
        else {
            continue;
        };

        let mut first = *by_identifier.entry(identifier.clone()).or_insert(position);
        let metadata = record.metadata();
        if let (Some(title), Some(year)) = (metadata.title.as_deref(), metadata.year) {
            let title = normalize_title(title);
            if !title.is_empty() {
                first = first.min(*by_title_year.entry((title, year)).or_insert(position));
            }
        }

        if first != position {
            *duplicate_of = Some(first);
            marked += 1;
        }
    }
    marked
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::failure::ResolutionError;
    use crate::resolver::{Metadata, ResolvedRecord, SourceName};

    fn resolved(position: usize, doi: &str, title: Option<&str>, year: Option<i32>) -> BatchEntry {
        let identifier = Identifier::parse(doi).unwrap();
        let metadata = Metadata {
            title: title.map(str::to_string),
            year,
            ..Metadata::default()
        };
        BatchEntry {
            position,
            input: doi.to_string(),
            outcome: BatchOutcome::Resolved {
                identifier: identifier.clone(),
                key: format!("k{position}"),
                from_cache: false,
                record: ResolvedRecord::new(identifier, metadata, SourceName::new("crossref")),
                failures: Vec::new(),
                duplicate_of: None,
            },
        }
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  The Quick   Brown\tFox\n"), "the quick brown fox");
    }

    #[test]
    fn test_preprint_and_published_version_are_flagged() {
        let mut entries = vec![
            resolved(0, "10.1101/2020.01.01.123456", Some("Deep Learning for Cells"), Some(2020)),
            resolved(1, "10.1234/other", Some("Something Else"), Some(2020)),
            resolved(2, "10.1038/s41586-020-0001", Some("deep  learning for CELLS"), Some(2020)),
        ];

        assert_eq!(mark_duplicates(&mut entries), 1);
        assert_eq!(entries[0].duplicate_of(), None);
        assert_eq!(entries[1].duplicate_of(), None);
        assert_eq!(entries[2].duplicate_of(), Some(0));
    }

    #[test]
    fn test_same_identifier_points_at_first_occurrence() {
        let mut entries = vec![
            resolved(0, "10.1234/a", None, None),
            resolved(1, "10.1234/a", None, None),
            resolved(2, "10.1234/a", None, None),
        ];

        assert_eq!(mark_duplicates(&mut entries), 2);
        assert_eq!(entries[1].duplicate_of(), Some(0));
        assert_eq!(entries[2].duplicate_of(), Some(0));
    }

    #[test]
    fn test_same_title_in_different_years_is_not_a_duplicate() {
        let mut entries = vec![
            resolved(0, "10.1234/a", Some("Annual Report"), Some(2020)),
            resolved(1, "10.1234/b", Some("Annual Report"), Some(2021)),
            resolved(2, "10.1234/c", Some("Annual Report"), None),
        ];

        assert_eq!(mark_duplicates(&mut entries), 0);
    }

    #[test]
    fn test_failed_entries_are_skipped() {
        let mut entries = vec![
            BatchEntry {
                position: 0,
                input: "bogus".to_string(),
                outcome: BatchOutcome::Failed {
                    error: ResolutionError::validation("bogus", "not a DOI"),
                },
            },
            resolved(1, "10.1234/a", Some("Title"), Some(2020)),
        ];

        assert_eq!(mark_duplicates(&mut entries), 0);
        assert_eq!(entries[1].duplicate_of(), None);
    }
}
