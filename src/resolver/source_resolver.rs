//! Ordered multi-source resolution for a single identifier.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::record::ResolvedRecord;
use super::source::SourceConfig;
use crate::config::{ConfigError, validate_sources};
use crate::failure::{FailureKind, FailureRecord, ResolutionError};
use crate::http::{ConnectionPool, FetchRequest, RateLimiter};
use crate::parser::Identifier;

/// A successful resolution and the sources that failed before it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub record: ResolvedRecord,
    /// One entry per source tried before the one that answered, in order.
    pub failures: Vec<FailureRecord>,
}

impl Resolution {
    #[must_use]
    pub fn new(record: ResolvedRecord) -> Self {
        Self {
            record,
            failures: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_failures(mut self, failures: Vec<FailureRecord>) -> Self {
        self.failures = failures;
        self
    }
}

/// Turns one identifier into one record.
///
/// Uses `async_trait` so the batch coordinator can hold `Arc<dyn Resolve>`
/// and be driven by test doubles.
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Resolves `identifier`, or explains why no source could.
    async fn resolve(
        &self,
        identifier: &Identifier,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolutionError>;
}

/// Tries each configured source in order and returns the first success.
#[derive(Debug, Clone)]
pub struct SourceResolver {
    sources: Arc<[SourceConfig]>,
    pool: Arc<ConnectionPool>,
    limiter: Arc<RateLimiter>,
    mailto: Option<String>,
}

impl SourceResolver {
    /// Builds a resolver and registers one rate-limit bucket per source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an empty, duplicated or malformed source list.
    pub fn new(
        sources: Vec<SourceConfig>,
        pool: Arc<ConnectionPool>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, ConfigError> {
        validate_sources(&sources)?;
        for source in &sources {
            limiter.configure(source.name.as_str(), source.rate, source.window);
        }
        Ok(Self {
            sources: sources.into(),
            pool,
            limiter,
            mailto: None,
        })
    }

    /// Sets the contact address substituted for `{mailto}`.
    #[must_use]
    pub fn with_mailto(mut self, mailto: Option<String>) -> Self {
        self.mailto = mailto.filter(|m| !m.trim().is_empty());
        self
    }

    #[must_use]
    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// One source, one identifier. Any failure is reported as a record.
    async fn try_source(
        &self,
        source: &SourceConfig,
        identifier: &Identifier,
        cancel: &CancellationToken,
    ) -> Result<ResolvedRecord, FailureRecord> {
        let name = source.name.as_str();
        if self.limiter.wait(name, cancel).await.is_err() {
            return Err(FailureRecord::new(
                source.name.clone(),
                FailureKind::Cancelled,
                "cancelled while waiting for a rate-limit token",
            ));
        }

        let url = source.url_for(identifier, self.mailto.as_deref());
        let request = FetchRequest::get(url)
            .header("Accept", source.format.accept())
            .throttle(self.limiter.bucket(name));

        let response = match self.pool.fetch(&request, cancel).await {
            Ok(response) => response,
            Err(failure) => {
                return Err(FailureRecord::new(
                    source.name.clone(),
                    failure.kind(),
                    failure.error.to_string(),
                )
                .with_status(failure.error.http_status())
                .with_attempts(failure.attempts));
            }
        };

        match source.format.parse(&response.text()) {
            Ok(metadata) => Ok(ResolvedRecord::new(
                identifier.clone(),
                metadata,
                source.name.clone(),
            )),
            Err(error) => {
                warn!(source = name, error = %error, "malformed payload");
                Err(FailureRecord::new(
                    source.name.clone(),
                    FailureKind::MalformedPayload,
                    error.to_string(),
                )
                .with_attempts(response.attempts))
            }
        }
    }
}

#[async_trait]
impl Resolve for SourceResolver {
    #[instrument(skip(self, cancel), fields(doi = %identifier))]
    async fn resolve(
        &self,
        identifier: &Identifier,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolutionError> {
        let mut failures = Vec::new();

        for source in self.sources.iter() {
            if cancel.is_cancelled() {
                failures.push(FailureRecord::new(
                    source.name.clone(),
                    FailureKind::Cancelled,
                    "cancelled before this source was tried",
                ));
                break;
            }

            match self.try_source(source, identifier, cancel).await {
                Ok(record) => {
                    debug!(
                        source = %source.name,
                        quality = record.quality(),
                        failed_sources = failures.len(),
                        "resolved"
                    );
                    return Ok(Resolution::new(record).with_failures(failures));
                }
                Err(failure) => {
                    debug!(summary = %failure.summary(), kind = ?failure.kind, "source failed");
                    let cancelled = failure.kind == FailureKind::Cancelled;
                    failures.push(failure);
                    if cancelled {
                        break;
                    }
                }
            }
        }

        Err(ResolutionError::from_failures(identifier.as_str(), failures))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use std::time::Duration;

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::http::RetryPolicy;
    use crate::resolver::PayloadFormat;
    use crate::test_support::socket_guard::start_mock_server_or_skip;

    const CSL_BODY: &str =
        r#"{"title": "Found It", "author": [{"family": "Smith", "given": "J"}], "issued": {"date-parts": [[2020]]}}"#;

    fn pool(max_retries: u32) -> Arc<ConnectionPool> {
        Arc::new(
            ConnectionPool::new(
                "bibresolve-test",
                4,
                Duration::from_secs(5),
                RetryPolicy::new(max_retries, Duration::from_millis(5), Duration::from_millis(20)),
            )
            .unwrap(),
        )
    }

    fn sources(server: &MockServer) -> Vec<SourceConfig> {
        ["a", "b", "c"]
            .into_iter()
            .map(|name| {
                SourceConfig::new(
                    name,
                    format!("{}/{name}/{{doi}}", server.uri()),
                    PayloadFormat::CslJson,
                )
                .with_rate(0, Duration::from_secs(1))
            })
            .collect()
    }

    fn resolver(server: &MockServer, max_retries: u32) -> SourceResolver {
        SourceResolver::new(sources(server), pool(max_retries), Arc::new(RateLimiter::new())).unwrap()
    }

    fn doi() -> Identifier {
        Identifier::parse("10.1234/abc").unwrap()
    }

    async fn mount(server: &MockServer, route: &str, status: u16, body: &str, expected: u64) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .expect(expected)
            .mount(server)
            .await;
    }

    // ==================== Construction Tests ====================

    #[test]
    fn test_new_rejects_empty_source_list() {
        let result = SourceResolver::new(Vec::new(), pool(0), Arc::new(RateLimiter::new()));
        assert!(matches!(result, Err(ConfigError::NoSources)));
    }

    #[test]
    fn test_new_configures_bucket_per_source() {
        let limiter = Arc::new(RateLimiter::new());
        let resolver =
            SourceResolver::new(SourceConfig::defaults(), pool(0), Arc::clone(&limiter)).unwrap();
        assert_eq!(resolver.sources().len(), 3);
        assert!(!limiter.bucket("crossref").is_unlimited());
        assert!(limiter.bucket("unknown").is_unlimited());
    }

    // ==================== Fallback Tests ====================

    #[tokio::test]
    async fn test_resolve_falls_back_and_stops_at_first_success() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount(&server, "/a/10.1234/abc", 404, "", 1).await;
        mount(&server, "/b/10.1234/abc", 200, CSL_BODY, 1).await;
        mount(&server, "/c/10.1234/abc", 200, CSL_BODY, 0).await;

        let Resolution { record, failures } = resolver(&server, 3)
            .resolve(&doi(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.source().as_str(), "b");
        assert_eq!(record.metadata().title.as_deref(), Some("Found It"));
        assert_eq!(record.identifier(), &doi());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].source.as_str(), "a");
        assert_eq!(failures[0].kind, FailureKind::NotFound);
        assert_eq!(failures[0].status, Some(404));
    }

    #[tokio::test]
    async fn test_resolve_first_source_success_has_no_failures() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount(&server, "/a/10.1234/abc", 200, CSL_BODY, 1).await;

        let resolution = resolver(&server, 0)
            .resolve(&doi(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(resolution.failures.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_all_sources_fail_lists_every_failure() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount(&server, "/a/10.1234/abc", 404, "", 1).await;
        mount(&server, "/b/10.1234/abc", 404, "", 1).await;
        mount(&server, "/c/10.1234/abc", 410, "", 1).await;

        let err = resolver(&server, 3)
            .resolve(&doi(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::NotFound);
        assert_eq!(err.identifier, "10.1234/abc");
        assert_eq!(err.failures.len(), 3);
        assert_eq!(err.message, "a: 404, b: 404, c: 410");
        assert!(err.failures.iter().all(|f| f.attempts == 1));
    }

    #[tokio::test]
    async fn test_resolve_malformed_payload_fails_only_that_source() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount(&server, "/a/10.1234/abc", 200, "<html>not json</html>", 1).await;
        mount(&server, "/b/10.1234/abc", 200, CSL_BODY, 1).await;

        let resolution = resolver(&server, 0)
            .resolve(&doi(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resolution.record.source().as_str(), "b");
        assert_eq!(resolution.failures[0].kind, FailureKind::MalformedPayload);
        assert_eq!(resolution.failures[0].status, None);
    }

    #[tokio::test]
    async fn test_resolve_server_errors_are_network_class() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount(&server, "/a/10.1234/abc", 503, "", 2).await;
        mount(&server, "/b/10.1234/abc", 404, "", 1).await;
        mount(&server, "/c/10.1234/abc", 200, "{}", 1).await;

        let err = resolver(&server, 1)
            .resolve(&doi(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::Network);
        assert_eq!(err.failures[0].kind, FailureKind::ServerError);
        assert_eq!(err.failures[0].attempts, 2);
        assert_eq!(err.failures[2].kind, FailureKind::MalformedPayload);
    }

    #[tokio::test]
    async fn test_resolve_rate_limited_source_sets_aggregate_kind() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount(&server, "/a/10.1234/abc", 429, "", 1).await;
        mount(&server, "/b/10.1234/abc", 404, "", 1).await;
        mount(&server, "/c/10.1234/abc", 404, "", 1).await;

        let err = resolver(&server, 0)
            .resolve(&doi(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::RateLimited);
    }

    #[tokio::test]
    async fn test_resolve_sends_accept_header_for_format() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/a/10.1234/abc"))
            .and(header("accept", "application/vnd.citationstyles.csl+json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CSL_BODY))
            .expect(1)
            .mount(&server)
            .await;

        let resolution = resolver(&server, 0)
            .resolve(&doi(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resolution.record.source().as_str(), "a");
    }

    // ==================== Cancellation Tests ====================

    #[tokio::test]
    async fn test_resolve_cancelled_before_start_contacts_nobody() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount(&server, "/a/10.1234/abc", 200, CSL_BODY, 0).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = resolver(&server, 0).resolve(&doi(), &cancel).await.unwrap_err();

        assert_eq!(err.kind, FailureKind::Cancelled);
        assert_eq!(err.failures.len(), 1);
    }
}
