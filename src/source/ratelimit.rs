//! Rate-limiting decorators: a bursty token bucket and strict minimum-interval pacing.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{cancellable, Provider};
use crate::error::ProviderError;
use crate::types::Quote;

/// Smallest refill rate accepted; keeps wait computations finite.
const MIN_RATE: f64 = 1e-7;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by every call through one provider chain.
///
/// Starts full so the first `capacity` acquisitions are not throttled.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(tokens_per_second: f64, burst: u32) -> Self {
        let capacity = burst.max(1) as f64;
        Self {
            rate: tokens_per_second.max(MIN_RATE),
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("token bucket mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn refill(&self, st: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(st.last_refill).as_secs_f64();
        st.tokens = (st.tokens + elapsed * self.rate).clamp(0.0, self.capacity);
        st.last_refill = now;
    }

    /// Takes a token if one is available, otherwise returns how long until one is.
    fn try_take(&self) -> Result<(), Duration> {
        let mut st = self.lock_state();
        self.refill(&mut st);
        if st.tokens >= 1.0 {
            st.tokens -= 1.0;
            return Ok(());
        }
        let deficit = 1.0 - st.tokens;
        let wait = Duration::from_secs_f64(deficit / self.rate);
        Err(wait.max(Duration::from_millis(1)))
    }

    /// Waits until a token is available or `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), ProviderError> {
        loop {
            let wait = match self.try_take() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            tracing::debug!(wait_ms = wait.as_millis() as u64, "token bucket empty, waiting");
            cancellable(cancel, async {
                tokio::time::sleep(wait).await;
                Ok(())
            })
            .await?;
        }
    }

    /// Tokens currently available, after refilling.
    #[cfg(test)]
    fn available(&self) -> f64 {
        let mut st = self.lock_state();
        self.refill(&mut st);
        st.tokens
    }
}

/// Gates the wrapped provider's fetches with a [`TokenBucket`].
pub struct TokenBucketProvider {
    inner: Arc<dyn Provider>,
    bucket: TokenBucket,
}

impl TokenBucketProvider {
    pub fn new(inner: Arc<dyn Provider>, bucket: TokenBucket) -> Self {
        Self { inner, bucket }
    }
}

#[async_trait]
impl Provider for TokenBucketProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch(
        &self,
        symbols: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Quote>, ProviderError> {
        self.bucket.acquire(cancel).await?;
        self.inner.fetch(symbols, cancel).await
    }
}

/// Starts each call no sooner than `interval` after the previous call ended.
///
/// Calls are serialized: the lock is held for the wait and the inner fetch.
pub struct MinInterval {
    inner: Arc<dyn Provider>,
    interval: Duration,
    last_end: tokio::sync::Mutex<Option<Instant>>,
}

impl MinInterval {
    pub fn new(inner: Arc<dyn Provider>, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            last_end: tokio::sync::Mutex::new(None),
        }
    }
}

/// Records when a call ended, even if the call's future is dropped mid-flight.
struct EndStamp<'a>(tokio::sync::MutexGuard<'a, Option<Instant>>);

impl Drop for EndStamp<'_> {
    fn drop(&mut self) {
        *self.0 = Some(Instant::now());
    }
}

#[async_trait]
impl Provider for MinInterval {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch(
        &self,
        symbols: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Quote>, ProviderError> {
        let last_end = cancellable(cancel, async { Ok(self.last_end.lock().await) }).await?;

        if let Some(prev) = *last_end {
            let ready_at = prev + self.interval;
            if ready_at > Instant::now() {
                tracing::debug!(
                    provider = self.inner.name(),
                    wait_ms = (ready_at - Instant::now()).as_millis() as u64,
                    "min interval not elapsed, waiting"
                );
                cancellable(cancel, async {
                    tokio::time::sleep_until(ready_at).await;
                    Ok(())
                })
                .await?;
            }
        }

        let _stamp = EndStamp(last_end);
        self.inner.fetch(symbols, cancel).await
    }
}
