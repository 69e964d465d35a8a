//! Constants for the HTTP layer (timeouts, pool sizing, rate limiting).

use std::time::Duration;

/// Default reusable connections per upstream host.
pub const DEFAULT_POOL_SIZE: usize = 16;

/// Default per-fetch timeout (10 seconds).
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP connect timeout (5 seconds).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle connections are dropped after this long.
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Warning threshold for cumulative Retry-After penalties per source (30 seconds).
pub const CUMULATIVE_PENALTY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);
