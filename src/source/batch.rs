//! Adaptive batching for upstreams that reject oversized requests.
//!
//! Batches rejected as oversize/invalid are bisected until they succeed or a
//! single name remains, which is then skipped. Throttled or server-side
//! failures are retried on the same batch with capped exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::cancellable;
use crate::error::{ProviderError, RetryClass};

/// One upstream request for a whole batch of names.
#[async_trait]
pub trait BatchUpstream: Send + Sync {
    type Entry: Send + 'static;

    async fn fetch_batch(
        &self,
        names: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Self::Entry>, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct BatchPolicy {
    /// Initial chunk size; zero sends everything in one request.
    pub max_items_per_request: usize,
    pub max_concurrency: usize,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_items_per_request: 200,
            max_concurrency: 2,
            max_retries: 3,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
        }
    }
}

/// Everything gathered from one adaptive fetch.
#[derive(Debug)]
pub struct BatchOutcome<E> {
    pub entries: Vec<E>,
    /// Single names the upstream kept rejecting as invalid.
    pub skipped: Vec<String>,
    /// First error among sub-batches; siblings still contributed entries.
    pub first_error: Option<ProviderError>,
}

impl<E> BatchOutcome<E> {
    fn empty() -> Self {
        Self {
            entries: vec![],
            skipped: vec![],
            first_error: None,
        }
    }

    fn failed(e: ProviderError) -> Self {
        Self {
            first_error: Some(e),
            ..Self::empty()
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.entries.extend(other.entries);
        self.skipped.extend(other.skipped);
        if self.first_error.is_none() {
            self.first_error = other.first_error;
        }
        self
    }
}

struct ExponentialBackoff {
    attempt: u32,
    max_retries: u32,
    current: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    fn new(policy: &BatchPolicy) -> Self {
        Self {
            attempt: 0,
            max_retries: policy.max_retries,
            current: policy.base_backoff,
            max: policy.max_backoff,
        }
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        self.attempt += 1;
        let delay = self.current.min(self.max);
        self.current = (self.current * 2).min(self.max);
        Some(delay)
    }
}

pub struct BatchClient<U> {
    upstream: U,
    policy: BatchPolicy,
    permits: Arc<Semaphore>,
}

impl<U: BatchUpstream> BatchClient<U> {
    pub fn new(upstream: U, policy: BatchPolicy) -> Self {
        let permits = Arc::new(Semaphore::new(policy.max_concurrency.max(1)));
        Self {
            upstream,
            policy,
            permits,
        }
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    /// Fetches every name, chunked, split and retried as needed.
    pub async fn fetch_all(
        &self,
        names: &[String],
        cancel: &CancellationToken,
    ) -> BatchOutcome<U::Entry> {
        if names.is_empty() {
            return BatchOutcome::empty();
        }
        let size = match self.policy.max_items_per_request {
            0 => names.len(),
            n => n,
        };
        let chunks: Vec<Vec<String>> = names.chunks(size).map(|c| c.to_vec()).collect();

        tracing::debug!(
            total = names.len(),
            chunks = chunks.len(),
            chunk_size = size,
            conc = self.policy.max_concurrency,
            "fetching batches"
        );

        join_all(chunks.into_iter().map(|c| self.fetch_split(c, cancel)))
            .await
            .into_iter()
            .fold(BatchOutcome::empty(), BatchOutcome::merge)
    }

    async fn request(
        &self,
        names: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<U::Entry>, ProviderError> {
        let _permit = cancellable(cancel, async {
            self.permits
                .acquire()
                .await
                .map_err(|_| ProviderError::Cancelled)
        })
        .await?;
        cancellable(cancel, self.upstream.fetch_batch(names, cancel)).await
    }

    fn fetch_split<'a>(
        &'a self,
        mut names: Vec<String>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, BatchOutcome<U::Entry>> {
        Box::pin(async move {
            let mut backoff = ExponentialBackoff::new(&self.policy);
            loop {
                let err = match self.request(&names, cancel).await {
                    Ok(entries) => {
                        return BatchOutcome {
                            entries,
                            ..BatchOutcome::empty()
                        }
                    }
                    Err(e) => e,
                };

                match err.retry_class() {
                    RetryClass::Split if names.len() <= 1 => {
                        tracing::warn!(symbol = ?names.first(), error = %err, "skipping symbol rejected by upstream");
                        return BatchOutcome {
                            skipped: names,
                            ..BatchOutcome::empty()
                        };
                    }
                    RetryClass::Split => {
                        let right = names.split_off(names.len() / 2);
                        tracing::debug!(
                            left = names.len(),
                            right = right.len(),
                            error = %err,
                            "splitting rejected batch"
                        );
                        let (l, r) = futures::join!(
                            self.fetch_split(names, cancel),
                            self.fetch_split(right, cancel)
                        );
                        return l.merge(r);
                    }
                    RetryClass::Backoff => match backoff.next_backoff() {
                        Some(delay) => {
                            tracing::warn!(
                                error = %err,
                                batch = names.len(),
                                attempt = backoff.attempt,
                                delay_ms = delay.as_millis() as u64,
                                "transient upstream failure, retrying"
                            );
                            let slept = cancellable(cancel, async {
                                tokio::time::sleep(delay).await;
                                Ok(())
                            })
                            .await;
                            if let Err(e) = slept {
                                return BatchOutcome::failed(e);
                            }
                        }
                        None => return BatchOutcome::failed(err),
                    },
                    RetryClass::Never => return BatchOutcome::failed(err),
                }
            }
        })
    }
}
