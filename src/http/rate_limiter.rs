//! Per-source token-bucket rate limiting.
//!
//! Each upstream source gets its own [`TokenBucket`], so throttling one registry
//! never starves requests to another. A bucket holds an `allowance` that
//! refills continuously at `rate / window` tokens per second, capped at `rate`
//! (the burst size). Every permitted request consumes one token.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use bibresolve_core::http::TokenBucket;
//!
//! let bucket = TokenBucket::new(2, Duration::from_secs(1));
//! assert!(bucket.acquire());
//! assert!(bucket.acquire());
//! assert!(!bucket.acquire()); // burst exhausted
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::constants::{CUMULATIVE_PENALTY_WARNING_THRESHOLD, MAX_RETRY_AFTER};

/// Absorbs float drift in the refill arithmetic.
const TOKEN_EPSILON: f64 = 1e-9;

/// Timer resolution floor for a single wait step.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Returned by [`TokenBucket::wait`] when cancellation wins the race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limiter wait cancelled")]
pub struct WaitCancelled;

/// A single token bucket.
///
/// The mutable state sits behind one `std::sync::Mutex`; critical sections
/// never await, so the lock is only held for a refill calculation.
#[derive(Debug)]
pub struct TokenBucket {
    /// Tokens per window, also the burst capacity. Zero means unlimited.
    rate: f64,
    window: Duration,
    state: Mutex<BucketState>,
    /// Sum of server-mandated penalties (milliseconds).
    penalty_ms: AtomicU64,
}

#[derive(Debug)]
struct BucketState {
    allowance: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket allowing `rate` requests per `window`.
    ///
    /// A `rate` of zero or a zero `window` produces an unlimited bucket.
    #[must_use]
    pub fn new(rate: u32, window: Duration) -> Self {
        let rate = if window.is_zero() { 0.0 } else { f64::from(rate) };
        Self {
            rate,
            window,
            state: Mutex::new(BucketState {
                allowance: rate,
                last_refill: Instant::now(),
            }),
            penalty_ms: AtomicU64::new(0),
        }
    }

    /// A bucket that always grants.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(0, Duration::ZERO)
    }

    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.rate <= 0.0
    }

    /// Tokens currently available (after refilling).
    #[must_use]
    pub fn available(&self) -> f64 {
        if self.is_unlimited() {
            return f64::INFINITY;
        }
        let mut state = self.lock();
        self.refill(&mut state);
        state.allowance
    }

    /// Takes a token if one is available. Never blocks, never errors.
    pub fn acquire(&self) -> bool {
        self.try_take().is_ok()
    }

    /// Suspends until a token is available, or until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`WaitCancelled`] if the token is cancelled before a token is granted.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), WaitCancelled> {
        loop {
            if cancel.is_cancelled() {
                return Err(WaitCancelled);
            }
            let delay = match self.try_take() {
                Ok(()) => return Ok(()),
                Err(delay) => delay,
            };
            debug!(delay_ms = delay.as_millis(), "waiting for rate limit token");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(WaitCancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Records a server-mandated pause (from a Retry-After header).
    ///
    /// The allowance is drawn down so that the next token becomes available
    /// only after `delay`, for every caller sharing this bucket.
    pub fn penalize(&self, delay: Duration) {
        if self.is_unlimited() || delay.is_zero() {
            return;
        }
        {
            let mut state = self.lock();
            self.refill(&mut state);
            let floor = 1.0 - delay.as_secs_f64() * self.refill_per_sec();
            state.allowance = state.allowance.min(floor);
        }

        #[allow(clippy::cast_possible_truncation)]
        let delay_ms = delay.as_millis() as u64;
        let cumulative =
            Duration::from_millis(self.penalty_ms.fetch_add(delay_ms, Ordering::SeqCst) + delay_ms);
        debug!(
            delay_ms,
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );
        if cumulative >= CUMULATIVE_PENALTY_WARNING_THRESHOLD {
            warn!(
                cumulative_delay_secs = cumulative.as_secs(),
                "excessive server rate limiting - consider lowering the request rate"
            );
        }
    }

    /// Takes a token, or reports how long until one will exist.
    fn try_take(&self) -> Result<(), Duration> {
        if self.is_unlimited() {
            return Ok(());
        }
        let mut state = self.lock();
        self.refill(&mut state);
        if state.allowance + TOKEN_EPSILON >= 1.0 {
            state.allowance -= 1.0;
            return Ok(());
        }
        let missing = 1.0 - state.allowance;
        Err(Duration::from_secs_f64(missing / self.refill_per_sec()).max(MIN_WAIT))
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        state.last_refill = now;
        state.allowance = (state.allowance + elapsed.as_secs_f64() * self.refill_per_sec()).min(self.rate);
    }

    fn refill_per_sec(&self) -> f64 {
        self.rate / self.window.as_secs_f64()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry of buckets keyed by source name.
///
/// Designed to be wrapped in `Arc` and shared across worker tasks. Buckets are
/// handed out as `Arc<TokenBucket>` so the `DashMap` shard lock is released
/// before any waiting happens.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: DashMap<String, Arc<TokenBucket>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the bucket for `source`, replacing any previous one.
    #[instrument(skip(self))]
    pub fn configure(&self, source: &str, rate: u32, window: Duration) {
        debug!("configuring source bucket");
        self.buckets
            .insert(source.to_string(), Arc::new(TokenBucket::new(rate, window)));
    }

    /// Bucket for `source`. Unknown sources get an unlimited bucket.
    #[must_use]
    pub fn bucket(&self, source: &str) -> Arc<TokenBucket> {
        self.buckets
            .entry(source.to_string())
            .or_insert_with(|| {
                debug!(source, "no bucket configured for source, using unlimited");
                Arc::new(TokenBucket::unlimited())
            })
            .clone()
    }

    pub fn acquire(&self, source: &str) -> bool {
        self.bucket(source).acquire()
    }

    /// # Errors
    ///
    /// Returns [`WaitCancelled`] if `cancel` fires first.
    pub async fn wait(&self, source: &str, cancel: &CancellationToken) -> Result<(), WaitCancelled> {
        let bucket = self.bucket(source);
        bucket.wait(cancel).await
    }

    pub fn penalize(&self, source: &str, delay: Duration) {
        self.bucket(source).penalize(delay);
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports integer seconds (`120`) and HTTP-dates
/// (`Wed, 21 Oct 2025 07:28:00 GMT`) per RFC 7231. Values above one hour are
/// capped; past dates yield zero.
///
/// ```
/// use std::time::Duration;
/// use bibresolve_core::http::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("-1"), None);
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(duration.min(MAX_RETRY_AFTER));
    }

    match httpdate::parse_http_date(header_value) {
        Ok(datetime) => Some(
            datetime
                .duration_since(std::time::SystemTime::now())
                .map_or(Duration::ZERO, |d| d.min(MAX_RETRY_AFTER)),
        ),
        Err(_) => {
            debug!(header_value, "unparseable Retry-After value");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== TokenBucket Tests ====================

    #[tokio::test]
    async fn test_bucket_starts_full_and_exhausts() {
        tokio::time::pause();
        let bucket = TokenBucket::new(3, Duration::from_secs(1));
        assert!(bucket.acquire());
        assert!(bucket.acquire());
        assert!(bucket.acquire());
        assert!(!bucket.acquire());
    }

    #[tokio::test]
    async fn test_bucket_refills_proportionally() {
        tokio::time::pause();
        let bucket = TokenBucket::new(2, Duration::from_secs(1));
        assert!(bucket.acquire());
        assert!(bucket.acquire());
        assert!(!bucket.acquire());

        // Half a window refills one token at 2 per second
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(bucket.acquire());
        assert!(!bucket.acquire());
    }

    #[tokio::test]
    async fn test_bucket_refill_capped_at_rate() {
        tokio::time::pause();
        let bucket = TokenBucket::new(2, Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!((bucket.available() - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_unlimited_bucket_always_grants() {
        let bucket = TokenBucket::unlimited();
        assert!(bucket.is_unlimited());
        for _ in 0..1000 {
            assert!(bucket.acquire());
        }
    }

    #[tokio::test]
    async fn test_wait_suspends_until_token() {
        tokio::time::pause();
        let bucket = TokenBucket::new(1, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        bucket.wait(&cancel).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(10));

        bucket.wait(&cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(990));
        assert!(start.elapsed() < Duration::from_millis(1100));
    }

    #[tokio::test]
    async fn test_wait_sustained_rate() {
        tokio::time::pause();
        let bucket = TokenBucket::new(5, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        // 5 burst + 10 more at 5/s
        for _ in 0..15 {
            bucket.wait(&cancel).await.unwrap();
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1990), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(2100), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_wait_returns_cancelled() {
        tokio::time::pause();
        let bucket = Arc::new(TokenBucket::new(1, Duration::from_secs(60)));
        assert!(bucket.acquire());

        let cancel = CancellationToken::new();
        let waiter = {
            let bucket = Arc::clone(&bucket);
            let cancel = cancel.clone();
            tokio::spawn(async move { bucket.wait(&cancel).await })
        };
        tokio::time::advance(Duration::from_secs(1)).await;
        cancel.cancel();

        assert_eq!(waiter.await.unwrap(), Err(WaitCancelled));
    }

    #[tokio::test]
    async fn test_wait_already_cancelled_returns_immediately() {
        let bucket = TokenBucket::new(10, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(bucket.wait(&cancel).await, Err(WaitCancelled));
    }

    #[tokio::test]
    async fn test_penalize_delays_next_token() {
        tokio::time::pause();
        let bucket = TokenBucket::new(10, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        bucket.penalize(Duration::from_secs(2));
        assert!(!bucket.acquire());

        let start = Instant::now();
        bucket.wait(&cancel).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1990), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(2100), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_concurrent_acquire_never_exceeds_burst() {
        tokio::time::pause();
        let bucket = Arc::new(TokenBucket::new(10, Duration::from_secs(60)));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let bucket = Arc::clone(&bucket);
            handles.push(tokio::spawn(async move { bucket.acquire() }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 10);
    }

    // ==================== RateLimiter Tests ====================

    #[tokio::test]
    async fn test_limiter_sources_are_independent() {
        tokio::time::pause();
        let limiter = RateLimiter::new();
        limiter.configure("crossref", 1, Duration::from_secs(1));
        limiter.configure("datacite", 1, Duration::from_secs(1));

        assert!(limiter.acquire("crossref"));
        assert!(!limiter.acquire("crossref"));
        assert!(limiter.acquire("datacite"));
    }

    #[tokio::test]
    async fn test_limiter_unknown_source_is_unlimited() {
        let limiter = RateLimiter::new();
        for _ in 0..100 {
            assert!(limiter.acquire("somewhere"));
        }
    }

    // ==================== Retry-After Parsing Tests ====================

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_parse_retry_after_caps_at_one_hour() {
        assert_eq!(parse_retry_after("999999"), Some(MAX_RETRY_AFTER));
    }

    #[test]
    fn test_parse_retry_after_past_http_date_is_zero() {
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_parse_retry_after_future_http_date() {
        let future = std::time::SystemTime::now() + Duration::from_secs(120);
        let header = httpdate::fmt_http_date(future);
        let parsed = parse_retry_after(&header).unwrap();
        assert!(parsed <= Duration::from_secs(120));
        assert!(parsed >= Duration::from_secs(100));
    }

    #[test]
    fn test_parse_retry_after_garbage() {
        assert_eq!(parse_retry_after("later"), None);
        assert_eq!(parse_retry_after("-5"), None);
    }
}
