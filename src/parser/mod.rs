//! Identifier parsing: the boundary where raw user input becomes [`Identifier`]s.
//!
//! Nothing invalid gets past this module. Inputs that fail normalization are
//! reported as [`ValidationError`]s and never reach the network.
//!
//! # Example
//!
//! ```
//! use bibresolve_core::parser::{Identifier, split_inputs};
//!
//! let inputs = split_inputs("10.1234/a\n\n  doi:10.5678/B  \n");
//! assert_eq!(inputs, vec!["10.1234/a", "doi:10.5678/B"]);
//! assert_eq!(Identifier::parse(&inputs[1]).unwrap().as_str(), "10.5678/b");
//! ```

mod doi;
mod error;

pub use doi::{Identifier, extract_dois};
pub use error::{MAX_IDENTIFIER_LENGTH, ValidationError};

use tracing::debug;

/// Splits line-oriented input into raw identifier candidates.
///
/// Blank lines and `#` comment lines are dropped; everything else is kept
/// verbatim (trimmed) so invalid lines still show up in the batch report.
#[must_use]
pub fn split_inputs(text: &str) -> Vec<String> {
    let inputs: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect();
    debug!(count = inputs.len(), "split line input");
    inputs
}

/// Scans free text (reference lists, notes) for DOI candidates.
#[must_use]
pub fn scan_inputs(text: &str) -> Vec<String> {
    let inputs: Vec<String> = extract_dois(text)
        .into_iter()
        .map(ToString::to_string)
        .collect();
    debug!(count = inputs.len(), "scanned free text for DOIs");
    inputs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_inputs_skips_blank_and_comment_lines() {
        let inputs = split_inputs("# header\n10.1234/a\n\n   \nnot-a-doi\n");
        assert_eq!(inputs, vec!["10.1234/a", "not-a-doi"]);
    }

    #[test]
    fn test_scan_inputs_finds_embedded_dois() {
        let text = "Smith J. (2020) A study. Nature. doi:10.1038/abc123.\nJones (2019) 10.1126/science.xyz";
        let inputs = scan_inputs(text);
        assert_eq!(inputs.len(), 2);
        assert!(inputs[0].starts_with("doi:10.1038/abc123"));
        assert_eq!(inputs[1], "10.1126/science.xyz");
    }
}
