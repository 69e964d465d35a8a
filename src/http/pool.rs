//! Pooled HTTP transport with per-host concurrency limits and retry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::client::build_http_client;
use super::constants::{DEFAULT_FETCH_TIMEOUT, DEFAULT_POOL_SIZE};
use super::rate_limiter::{TokenBucket, parse_retry_after};
use super::retry::{AttemptOutcome, RetryPolicy, StatusClass, classify_status};
use super::{FetchError, FetchFailure};

/// One GET request as the pool sees it.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    url: String,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
    throttle: Option<Arc<TokenBucket>>,
}

impl FetchRequest {
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            timeout: None,
            throttle: None,
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bucket consulted before each retry and penalized on Retry-After.
    ///
    /// The caller is expected to have taken a token for the first attempt.
    #[must_use]
    pub fn throttle(mut self, bucket: Arc<TokenBucket>) -> Self {
        self.throttle = Some(bucket);
        self
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// A successful response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

impl FetchResponse {
    /// Body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Counters exposed by [`ConnectionPool::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub requests_sent: u64,
    pub retries: u64,
}

/// Reusable HTTP transport.
///
/// Holds one reqwest client (idle pool capped at `pool_size` per host) and a
/// semaphore per host bounding in-flight requests to the same size. Designed to
/// be shared behind `Arc`.
#[derive(Debug)]
pub struct ConnectionPool {
    client: Client,
    pool_size: usize,
    default_timeout: Duration,
    policy: RetryPolicy,
    host_permits: DashMap<String, Arc<Semaphore>>,
    requests_sent: AtomicU64,
    retries: AtomicU64,
}

impl ConnectionPool {
    /// Creates a pool with its own client.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the HTTP client cannot be built.
    pub fn new(
        user_agent: &str,
        pool_size: usize,
        default_timeout: Duration,
        policy: RetryPolicy,
    ) -> Result<Self, FetchError> {
        let pool_size = pool_size.max(1);
        let client = build_http_client(user_agent, pool_size, default_timeout)?;
        Ok(Self::with_client(client, pool_size, default_timeout, policy))
    }

    /// Creates a pool around an existing client.
    #[must_use]
    pub fn with_client(
        client: Client,
        pool_size: usize,
        default_timeout: Duration,
        policy: RetryPolicy,
    ) -> Self {
        if policy.max_retries() > policy.increasing_retries() {
            warn!(
                max_retries = policy.max_retries(),
                increasing = policy.increasing_retries(),
                "later retries all wait the maximum backoff delay"
            );
        }
        Self {
            client,
            pool_size: pool_size.max(1),
            default_timeout,
            policy,
            host_permits: DashMap::new(),
            requests_sent: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }

    /// Fetches `request`, retrying transient failures.
    ///
    /// Statuses 429, 500, 502, 503 and 504 and request timeouts are retried up
    /// to `max_retries` times with exponential backoff. Any other non-success
    /// status fails immediately. If a 429 was seen at any point, a final
    /// failure is reported as [`FetchError::RateLimited`].
    ///
    /// Cancellation is observed between attempts: an in-flight request is
    /// allowed to finish, but no further attempt starts.
    ///
    /// # Errors
    ///
    /// Returns [`FetchFailure`] with the last error and the number of attempts.
    #[instrument(skip(self, request, cancel), fields(url = %request.url))]
    pub async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse, FetchFailure> {
        let host = extract_host(&request.url)
            .ok_or_else(|| FetchFailure::new(FetchError::invalid_url(&request.url, "URL has no host"), 0))?;

        let mut attempts: u32 = 0;
        let mut saw_rate_limit = false;
        let mut last_status = None;

        loop {
            if attempts > 0 {
                if cancel.is_cancelled() {
                    return Err(FetchFailure::new(FetchError::cancelled(&request.url), attempts));
                }
                if let Some(bucket) = &request.throttle
                    && bucket.wait(cancel).await.is_err()
                {
                    return Err(FetchFailure::new(FetchError::cancelled(&request.url), attempts));
                }
            }

            let outcome = self.attempt(request, &host).await;
            attempts += 1;

            let (error, retry_after) = match outcome {
                AttemptOutcome::Success(mut response) => {
                    response.attempts = attempts;
                    debug!(status = response.status, attempts, "fetch succeeded");
                    return Ok(response);
                }
                AttemptOutcome::Terminal(error) => {
                    debug!(error = %error, attempts, "terminal fetch failure");
                    let error = if saw_rate_limit {
                        FetchError::rate_limited(&request.url, error.http_status())
                    } else {
                        error
                    };
                    return Err(FetchFailure::new(error, attempts));
                }
                AttemptOutcome::Retryable { error, retry_after } => (error, retry_after),
            };

            last_status = error.http_status().or(last_status);
            if error.http_status() == Some(429) {
                saw_rate_limit = true;
                if let (Some(bucket), Some(delay)) = (&request.throttle, retry_after) {
                    bucket.penalize(delay);
                }
            }

            if !self.policy.allows_retry(attempts) {
                warn!(error = %error, attempts, "retries exhausted");
                let error = if saw_rate_limit {
                    FetchError::rate_limited(&request.url, last_status)
                } else {
                    error
                };
                return Err(FetchFailure::new(error, attempts));
            }

            let delay = retry_after.map_or_else(
                || self.policy.delay_for(attempts - 1),
                |server| self.policy.server_delay(server),
            );
            self.retries.fetch_add(1, Ordering::Relaxed);
            debug!(
                error = %error,
                attempt = attempts,
                delay_ms = delay.as_millis(),
                "retrying after backoff"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(FetchFailure::new(FetchError::cancelled(&request.url), attempts));
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Performs exactly one request.
    async fn attempt(&self, request: &FetchRequest, host: &str) -> AttemptOutcome<FetchResponse> {
        let permits = self.host_permits(host);
        let Ok(_permit) = permits.acquire_owned().await else {
            return AttemptOutcome::Terminal(FetchError::client("host semaphore closed"));
        };

        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        let mut builder = self
            .client
            .get(&request.url)
            .timeout(request.timeout.unwrap_or(self.default_timeout));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(error) => return classify_transport_error(&request.url, error),
        };

        let status = response.status().as_u16();
        match classify_status(status) {
            StatusClass::Success => match response.bytes().await {
                Ok(body) => AttemptOutcome::Success(FetchResponse {
                    status,
                    body: body.to_vec(),
                    attempts: 0,
                }),
                Err(error) => classify_transport_error(&request.url, error),
            },
            StatusClass::Retryable => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(parse_retry_after);
                AttemptOutcome::Retryable {
                    error: FetchError::status(&request.url, status, retry_after),
                    retry_after,
                }
            }
            StatusClass::Terminal => {
                AttemptOutcome::Terminal(FetchError::status(&request.url, status, None))
            }
        }
    }

    fn host_permits(&self, host: &str) -> Arc<Semaphore> {
        self.host_permits
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.pool_size)))
            .clone()
    }
}

/// Timeouts are retryable; other transport failures are not.
fn classify_transport_error(url: &str, error: reqwest::Error) -> AttemptOutcome<FetchResponse> {
    if error.is_timeout() {
        AttemptOutcome::Retryable {
            error: FetchError::timeout(url),
            retry_after: None,
        }
    } else if error.is_builder() {
        AttemptOutcome::Terminal(FetchError::invalid_url(url, error.to_string()))
    } else {
        AttemptOutcome::Terminal(FetchError::network(url, error))
    }
}

/// Lowercased host (with port) of a URL, used to key per-host limits.
///
/// ```
/// use bibresolve_core::http::extract_host;
///
/// assert_eq!(extract_host("https://API.crossref.org/works/x").as_deref(), Some("api.crossref.org"));
/// assert_eq!(extract_host("http://127.0.0.1:8080/x").as_deref(), Some("127.0.0.1:8080"));
/// assert_eq!(extract_host("not a url"), None);
/// ```
#[must_use]
pub fn extract_host(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    })
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::with_client(
            Client::new(),
            DEFAULT_POOL_SIZE,
            DEFAULT_FETCH_TIMEOUT,
            RetryPolicy::default(),
        )
    }
}
