//! Error types for identifier validation.

use thiserror::Error;

/// Maximum identifier length accepted at the boundary.
pub const MAX_IDENTIFIER_LENGTH: usize = 512;

/// Reasons a raw input cannot become an [`Identifier`](super::Identifier).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Input was empty after trimming prefixes and whitespace.
    #[error("empty identifier\n  Suggestion: Provide a DOI such as 10.1234/example")]
    Empty,

    /// Input is not shaped like a DOI.
    #[error("invalid DOI '{input}': {reason}\n  Suggestion: {suggestion}")]
    InvalidDoi {
        /// The normalized input that failed validation
        input: String,
        /// Why the DOI is invalid
        reason: String,
        /// How to fix the issue
        suggestion: String,
    },

    /// DOI has a registrant but nothing after the slash.
    #[error(
        "DOI '{input}' has no suffix\n  Suggestion: A DOI needs a suffix after the slash (10.1234/suffix)"
    )]
    MissingSuffix {
        /// The normalized input that failed validation
        input: String,
    },

    /// Input exceeds the accepted length.
    #[error("identifier too long ({length} chars, max {max}): {preview}...")]
    TooLong {
        /// Truncated input for display
        preview: String,
        /// Actual length
        length: usize,
        /// Maximum allowed
        max: usize,
    },
}

impl ValidationError {
    /// Creates an `InvalidDoi` error with the standard DOI format suggestion.
    #[must_use]
    pub fn invalid_doi(input: &str, reason: &str) -> Self {
        Self::InvalidDoi {
            input: input.to_string(),
            reason: reason.to_string(),
            suggestion: "DOIs look like 10.1234/example (registrant of 4-9 digits, then a suffix)"
                .to_string(),
        }
    }

    /// Creates a `MissingSuffix` error.
    #[must_use]
    pub fn missing_suffix(input: &str) -> Self {
        Self::MissingSuffix {
            input: input.to_string(),
        }
    }

    /// Creates a `TooLong` error.
    #[must_use]
    pub fn too_long(input: &str) -> Self {
        Self::TooLong {
            preview: input.chars().take(50).collect(),
            length: input.len(),
            max: MAX_IDENTIFIER_LENGTH,
        }
    }
}
