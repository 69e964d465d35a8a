//! Bounded-concurrency batch resolution.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::duplicates::mark_duplicates;
use super::report::{BatchEntry, BatchOutcome, BatchResult};
use crate::cache::TieredCache;
use crate::config::{BatchConfig, ConfigError, validate_concurrency};
use crate::failure::{FailureKind, FailureRecord, ResolutionError};
use crate::keys::{KeyDisambiguator, KeyPattern};
use crate::parser::Identifier;
use crate::resolver::{Resolution, ResolvedRecord, Resolve};

/// Called after each input finishes: `(completed, total, identifier, succeeded)`.
pub type ProgressCallback = Arc<dyn Fn(usize, usize, &str, bool) + Send + Sync>;

/// Result of one worker, before keys are assigned.
enum WorkerOutcome {
    Resolved {
        record: ResolvedRecord,
        failures: Vec<FailureRecord>,
        from_cache: bool,
    },
    Failed(ResolutionError),
}

impl WorkerOutcome {
    fn cached(record: ResolvedRecord) -> Self {
        Self::Resolved {
            record,
            failures: Vec::new(),
            from_cache: true,
        }
    }
}

/// State shared by every worker of every run.
struct Shared {
    resolver: Arc<dyn Resolve>,
    cache: Arc<TieredCache>,
    /// One async mutex per identifier currently being resolved.
    in_flight: DashMap<Identifier, Arc<AsyncMutex<()>>>,
}

/// Resolves batches of identifiers through the cache and resolver.
pub struct BatchCoordinator {
    shared: Arc<Shared>,
    concurrency: usize,
    timeout: Option<Duration>,
    key_pattern: KeyPattern,
    progress: Option<ProgressCallback>,
}

impl fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("concurrency", &self.concurrency)
            .field("timeout", &self.timeout)
            .field("key_pattern", &self.key_pattern)
            .field("progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}

impl BatchCoordinator {
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the concurrency is zero or above the maximum.
    pub fn new(
        resolver: Arc<dyn Resolve>,
        cache: Arc<TieredCache>,
        config: &BatchConfig,
    ) -> Result<Self, ConfigError> {
        validate_concurrency(config.concurrency)?;
        Ok(Self {
            shared: Arc::new(Shared {
                resolver,
                cache,
                in_flight: DashMap::new(),
            }),
            concurrency: config.concurrency,
            timeout: config.timeout,
            key_pattern: config.key_pattern,
            progress: None,
        })
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Changes the worker-pool width for subsequent runs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `concurrency` is zero or above the maximum.
    pub fn with_concurrency(mut self, concurrency: usize) -> Result<Self, ConfigError> {
        validate_concurrency(concurrency)?;
        self.concurrency = concurrency;
        Ok(self)
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[must_use]
    pub fn cache(&self) -> &TieredCache {
        &self.shared.cache
    }

    /// Resolves `inputs` and reports one entry per input position.
    ///
    /// Invalid inputs fail validation without touching the network.
    /// Per-identifier failures never abort the batch. When `cancel` fires or
    /// the configured deadline passes, in-flight work stops at the next
    /// attempt boundary and unfinished identifiers are reported as
    /// [`FailureKind::Cancelled`].
    pub async fn run<S: AsRef<str>>(&self, inputs: &[S], cancel: &CancellationToken) -> BatchResult {
        self.execute(inputs, self.concurrency, cancel).await
    }

    /// Like [`run`](Self::run), with a worker-pool width for this run only.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `concurrency` is zero or above the maximum.
    pub async fn run_with_concurrency<S: AsRef<str>>(
        &self,
        inputs: &[S],
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, ConfigError> {
        validate_concurrency(concurrency)?;
        Ok(self.execute(inputs, concurrency, cancel).await)
    }

    #[instrument(skip(self, inputs, cancel), fields(total = inputs.len()))]
    async fn execute<S: AsRef<str>>(
        &self,
        inputs: &[S],
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> BatchResult {
        let started = Instant::now();
        let total = inputs.len();
        let batch_cancel = cancel.child_token();
        let deadline = self.timeout.map(|limit| spawn_deadline(limit, batch_cancel.clone()));

        info!(total, "batch started");

        let mut slots: Vec<Option<BatchEntry>> = vec![None; total];
        let mut completed = 0usize;
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut workers = JoinSet::new();
        let mut task_positions = HashMap::new();

        for (position, raw) in inputs.iter().enumerate() {
            let raw = raw.as_ref();
            let identifier = match Identifier::parse(raw) {
                Ok(identifier) => identifier,
                Err(error) => {
                    debug!(position, input = raw, error = %error, "validation failed");
                    slots[position] = Some(BatchEntry {
                        position,
                        input: raw.to_string(),
                        outcome: BatchOutcome::Failed {
                            error: ResolutionError::validation(raw, error.to_string()),
                        },
                    });
                    completed += 1;
                    self.report_progress(completed, total, raw, false);
                    continue;
                }
            };

            let shared = Arc::clone(&self.shared);
            let semaphore = Arc::clone(&semaphore);
            let cancel = batch_cancel.clone();
            let handle = workers.spawn(async move {
                let outcome = resolve_one(&shared, &semaphore, identifier.clone(), &cancel).await;
                (position, identifier, outcome)
            });
            task_positions.insert(handle.id(), (position, raw.to_string()));
        }

        let mut resolved: Vec<(usize, Identifier, WorkerOutcome)> = Vec::new();
        while let Some(joined) = workers.join_next_with_id().await {
            let (position, input, outcome) = match joined {
                Ok((task_id, (position, identifier, outcome))) => {
                    task_positions.remove(&task_id);
                    (position, identifier.to_string(), Some((identifier, outcome)))
                }
                Err(join_error) => {
                    let Some((position, input)) = task_positions.remove(&join_error.id()) else {
                        warn!(error = %join_error, "lost track of a failed worker");
                        continue;
                    };
                    warn!(position, input = %input, error = %join_error, "worker panicked");
                    let error = ResolutionError::new(
                        FailureKind::Internal,
                        input.clone(),
                        format!("worker failed: {join_error}"),
                    );
                    slots[position] = Some(BatchEntry {
                        position,
                        input: input.clone(),
                        outcome: BatchOutcome::Failed { error },
                    });
                    (position, input, None)
                }
            };

            completed += 1;
            let succeeded = matches!(outcome, Some((_, WorkerOutcome::Resolved { .. })));
            self.report_progress(completed, total, &input, succeeded);
            if let Some((identifier, outcome)) = outcome {
                resolved.push((position, identifier, outcome));
            }
        }

        // Keys are handed out in input order so reruns assign the same keys.
        resolved.sort_by_key(|(position, _, _)| *position);
        let mut keys = KeyDisambiguator::new(self.key_pattern);
        for (position, identifier, outcome) in resolved {
            let outcome = match outcome {
                WorkerOutcome::Resolved {
                    record,
                    failures,
                    from_cache,
                } => BatchOutcome::Resolved {
                    key: keys.assign(&record),
                    identifier,
                    from_cache,
                    record,
                    failures,
                    duplicate_of: None,
                },
                WorkerOutcome::Failed(error) => BatchOutcome::Failed { error },
            };
            slots[position] = Some(BatchEntry {
                position,
                input: inputs[position].as_ref().to_string(),
                outcome,
            });
        }

        let cancelled = batch_cancel.is_cancelled();
        if let Some(deadline) = deadline {
            deadline.abort();
        }

        let mut entries: Vec<BatchEntry> = slots
            .into_iter()
            .enumerate()
            .map(|(position, slot)| {
                slot.unwrap_or_else(|| {
                    let input = inputs[position].as_ref();
                    BatchEntry {
                        position,
                        input: input.to_string(),
                        outcome: BatchOutcome::Failed {
                            error: ResolutionError::new(
                                FailureKind::Internal,
                                input,
                                "no outcome recorded",
                            ),
                        },
                    }
                })
            })
            .collect();

        let duplicates = mark_duplicates(&mut entries);
        if duplicates > 0 {
            debug!(duplicates, "flagged entries describing the same work");
        }

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let result = BatchResult::new(entries, elapsed_ms, cancelled);
        info!(
            attempted = result.stats.attempted,
            succeeded = result.stats.succeeded,
            failed = result.stats.failed,
            cache_hits = result.stats.cache_hits,
            duplicates = result.stats.duplicates,
            elapsed_ms,
            cancelled,
            "batch finished"
        );
        result
    }

    fn report_progress(&self, completed: usize, total: usize, identifier: &str, succeeded: bool) {
        if let Some(progress) = &self.progress {
            progress(completed, total, identifier, succeeded);
        }
    }
}

/// Cancels `token` once `limit` elapses.
fn spawn_deadline(limit: Duration, token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {}
            () = tokio::time::sleep(limit) => {
                warn!(timeout_ms = limit.as_millis(), "batch deadline reached; cancelling");
                token.cancel();
            }
        }
    })
}

/// Cache, then (coalesced) resolver, then cache write-through.
async fn resolve_one(
    shared: &Shared,
    semaphore: &Arc<Semaphore>,
    identifier: Identifier,
    cancel: &CancellationToken,
) -> WorkerOutcome {
    let _permit = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            return WorkerOutcome::Failed(ResolutionError::cancelled(identifier.as_str()));
        }
        permit = Arc::clone(semaphore).acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                return WorkerOutcome::Failed(ResolutionError::new(
                    FailureKind::Internal,
                    identifier.as_str(),
                    "worker pool closed",
                ));
            }
        },
    };

    if let Some(record) = shared.cache.get(&identifier).await {
        return WorkerOutcome::cached(record);
    }

    let lock = Arc::clone(
        shared
            .in_flight
            .entry(identifier.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .value(),
    );
    let outcome = {
        let _guard = lock.lock().await;
        // A duplicate that held the lock before us may have filled the cache.
        if let Some(record) = shared.cache.get(&identifier).await {
            WorkerOutcome::cached(record)
        } else {
            match shared.resolver.resolve(&identifier, cancel).await {
                Ok(Resolution { record, failures }) => {
                    shared.cache.put(&identifier, &record).await;
                    WorkerOutcome::Resolved {
                        record,
                        failures,
                        from_cache: false,
                    }
                }
                Err(error) => WorkerOutcome::Failed(error),
            }
        }
    };
    drop(lock);
    shared
        .in_flight
        .remove_if(&identifier, |_, lock| Arc::strong_count(lock) == 1);
    outcome
}
