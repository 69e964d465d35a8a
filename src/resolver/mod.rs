//! Identifier resolution against upstream metadata registries.
//!
//! # Architecture
//!
//! - [`SourceConfig`] - one registry: name, URL template, payload format, rate
//! - [`PayloadFormat`] - per-source body parser (Crossref JSON, CSL-JSON, BibTeX)
//! - [`SourceResolver`] - tries sources in order, first success wins
//! - [`Resolve`] - async trait the batch coordinator depends on
//! - [`Resolution`] - the record plus the sources that failed before it
//! - [`ResolvedRecord`] / [`Metadata`] - the immutable result
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bibresolve_core::http::{ConnectionPool, RateLimiter};
//! use bibresolve_core::parser::Identifier;
//! use bibresolve_core::resolver::{Resolve, SourceConfig, SourceResolver};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = SourceResolver::new(
//!     SourceConfig::defaults(),
//!     Arc::new(ConnectionPool::default()),
//!     Arc::new(RateLimiter::new()),
//! )?
//! .with_mailto(Some("me@example.org".to_string()));
//!
//! let doi = Identifier::parse("https://doi.org/10.1038/s41586-020-2649-2")?;
//! let resolution = resolver.resolve(&doi, &CancellationToken::new()).await?;
//! let record = &resolution.record;
//! println!("{:?} via {}", record.metadata().title, record.source());
//! # Ok(())
//! # }
//! ```

mod bibtex;
mod crossref;
mod csl;
mod record;
mod source;
mod source_resolver;

pub use record::{Author, Metadata, ResolvedRecord};
pub use source::{
    DOI_PLACEHOLDER, MAILTO_PLACEHOLDER, PayloadError, PayloadFormat, SourceConfig, SourceName,
};
pub use source_resolver::{Resolution, Resolve, SourceResolver};
