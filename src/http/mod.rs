//! HTTP transport: per-source throttling, pooled connections and retry.
//!
//! # Architecture
//!
//! - [`RateLimiter`] / [`TokenBucket`] - token buckets keyed by source name
//! - [`ConnectionPool`] - shared reqwest client, per-host permits, retry loop
//! - [`RetryPolicy`] / [`AttemptOutcome`] - backoff and per-attempt results
//! - [`FetchError`] / [`FetchFailure`] - structured transport failures
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use bibresolve_core::http::{ConnectionPool, FetchRequest, RetryPolicy};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = ConnectionPool::new("bibresolve/0.1", 16, Duration::from_secs(10), RetryPolicy::default())?;
//! let request = FetchRequest::get("https://api.crossref.org/works/10.1038/nature12373")
//!     .header("Accept", "application/json");
//! let response = pool.fetch(&request, &CancellationToken::new()).await?;
//! println!("{} bytes", response.body.len());
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod error;
mod pool;
mod rate_limiter;
mod retry;

pub use client::build_http_client;
pub use constants::{DEFAULT_FETCH_TIMEOUT, DEFAULT_POOL_SIZE, MAX_RETRY_AFTER};
pub use error::{FetchError, FetchFailure};
pub use pool::{ConnectionPool, FetchRequest, FetchResponse, PoolStats, extract_host};
pub use rate_limiter::{RateLimiter, TokenBucket, WaitCancelled, parse_retry_after};
pub use retry::{AttemptOutcome, DEFAULT_MAX_RETRIES, RetryPolicy, StatusClass, classify_status};
