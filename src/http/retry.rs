//! Retry policy with exponential backoff for transient fetch failures.
//!
//! A fetch attempt produces an explicit [`AttemptOutcome`]. The pool's retry
//! loop inspects it and asks the [`RetryPolicy`] for the next delay, so control
//! flow never depends on unwinding through error handlers.
//!
//! # Delay Calculation
//!
//! ```text
//! delay(n) = min(base_delay * 2^n + jitter, max_delay)    jitter <= 25% of base_delay * 2^n
//! ```
//!
//! Because jitter stays proportional to the exponential term, consecutive
//! delays are strictly increasing until the cap is reached.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::FetchError;

/// Default number of extra attempts after the first one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Upper bound of jitter as a fraction of the exponential component.
const JITTER_FRACTION: f64 = 0.25;

/// Bound for [`RetryPolicy::increasing_retries`] when the base delay is zero.
const MAX_INCREASING_RETRIES: u32 = 64;

/// Result of one request attempt.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    /// Request succeeded.
    Success(T),
    /// Request failed in a way another attempt may fix.
    Retryable {
        error: FetchError,
        /// Server-mandated delay (Retry-After), if any.
        retry_after: Option<Duration>,
    },
    /// Request failed and retrying would not help.
    Terminal(FetchError),
}

/// How an HTTP status should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Retryable,
    Terminal,
}

/// Classifies an HTTP status code.
///
/// | Status | Class | Rationale |
/// |--------|-------|-----------|
/// | 2xx | Success | |
/// | 400 | Terminal | Bad request - won't succeed on retry |
/// | 401 / 403 | Terminal | Source refuses this request |
/// | 404 / 410 | Terminal | Identifier unknown to this source |
/// | 429 | Retryable | Rate limited - retry with backoff |
/// | 500 / 502 / 503 / 504 | Retryable | Server or gateway trouble |
/// | anything else | Terminal | |
#[must_use]
#[allow(clippy::match_same_arms)]
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,

        400 => StatusClass::Terminal, // Bad Request
        401 => StatusClass::Terminal, // Unauthorized
        403 => StatusClass::Terminal, // Forbidden
        404 => StatusClass::Terminal, // Not Found
        410 => StatusClass::Terminal, // Gone
        429 => StatusClass::Retryable, // Too Many Requests

        500 => StatusClass::Retryable, // Internal Server Error
        502 => StatusClass::Retryable, // Bad Gateway
        503 => StatusClass::Retryable, // Service Unavailable
        504 => StatusClass::Retryable, // Gateway Timeout

        _ => StatusClass::Terminal,
    }
}

/// Backoff configuration.
///
/// # Default Values
///
/// - `max_retries`: 3 (so at most 4 attempts)
/// - `base_delay`: 1 second
/// - `max_delay`: 32 seconds
/// - jitter enabled
///
/// Delays grow strictly only until they reach `max_delay`; every later retry
/// waits exactly `max_delay`. With the defaults the first six retries
/// (1, 2, 4, 8, 16, 32 s) increase and retries 7 to 10 repeat 32 s.
/// [`increasing_retries`](Self::increasing_retries) gives the count for any
/// policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter: true,
        }
    }

    /// Policy with a custom retry count, defaults otherwise.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// No retries at all: one attempt per fetch.
    #[must_use]
    pub fn none() -> Self {
        Self::with_max_retries(0)
    }

    /// Same policy with deterministic delays.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// How many leading retries are guaranteed strictly increasing delays.
    /// Beyond this count every delay is `max_delay`.
    #[must_use]
    pub fn increasing_retries(&self) -> u32 {
        let factor = if self.jitter { 1.0 + JITTER_FRACTION } else { 1.0 };
        let max = self.max_delay.as_secs_f64();
        // Largest delay retry n can draw; retry n + 1 draws at least twice the
        // exponential part, so it is larger while this stays under the cap.
        let mut largest = self.base_delay.as_secs_f64() * factor;
        let mut count = 1;
        while largest < max && count < MAX_INCREASING_RETRIES {
            count += 1;
            largest *= 2.0;
        }
        count
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    #[must_use]
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made <= self.max_retries
    }

    /// Delay before retry number `retry` (0-indexed).
    #[instrument(skip(self), fields(max_retries = self.max_retries))]
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base_ms = self.base_delay.as_secs_f64() * 1000.0;
        let max_ms = self.max_delay.as_secs_f64() * 1000.0;

        let exponential_ms = base_ms * 2f64.powi(i32::try_from(retry).unwrap_or(i32::MAX));
        let jitter_ms = if self.jitter && exponential_ms.is_finite() {
            rand::thread_rng().gen_range(0.0..=exponential_ms * JITTER_FRACTION)
        } else {
            0.0
        };
        let delay_ms = (exponential_ms + jitter_ms).min(max_ms);

        debug!(retry, delay_ms, "computed backoff delay");
        Duration::from_secs_f64(delay_ms / 1000.0)
    }

    /// Delay to use when the server sent a Retry-After, capped at `max_delay`.
    #[must_use]
    pub fn server_delay(&self, retry_after: Duration) -> Duration {
        retry_after.min(self.max_delay)
    }
}
