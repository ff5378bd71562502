pub mod batch;
pub mod cache;
pub mod coalesce;
pub mod payload;
pub mod ratelimit;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::ChainSettings;
use crate::error::ProviderError;
use crate::types::Quote;

pub use cache::CachedProvider;
pub use payload::{PayloadCache, PayloadPrice, PayloadUpstream, SitePayload};
pub use ratelimit::{MinInterval, TokenBucket, TokenBucketProvider};

/// Abstraction for upstream price sources and the decorators stacked on them.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch quotes for the given symbols. Implementations must return
    /// `ProviderError::Cancelled` promptly once `cancel` fires.
    async fn fetch(
        &self,
        symbols: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Quote>, ProviderError>;
}

/// Wraps `inner` with the configured rate limit and TTL cache.
///
/// A token bucket is used when `max_requests_per_minute` is set, otherwise a
/// minimum interval when `min_request_interval_sec` is set; never both.
pub fn compose(inner: Arc<dyn Provider>, chain: &ChainSettings) -> Arc<dyn Provider> {
    let limited: Arc<dyn Provider> = if chain.max_requests_per_minute > 0 {
        let rate = chain.max_requests_per_minute as f64 / 60.0;
        let bucket = TokenBucket::new(rate, chain.burst.max(1));
        Arc::new(TokenBucketProvider::new(inner, bucket))
    } else if chain.min_request_interval_sec > 0 {
        let interval = Duration::from_secs(chain.min_request_interval_sec);
        Arc::new(MinInterval::new(inner, interval))
    } else {
        inner
    };

    if chain.cache_ttl_sec > 0 {
        let ttl = Duration::from_secs(chain.cache_ttl_sec);
        Arc::new(CachedProvider::new(limited, ttl, chain.cache_max_items))
    } else {
        limited
    }
}

/// Races `fut` against cancellation.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, ProviderError>
where
    F: std::future::Future<Output = Result<T, ProviderError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        r = fut => r,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    use super::*;

    /// In-memory provider that counts calls and records what it was asked for.
    /// An empty request returns every known symbol.
    pub struct FakeProvider {
        pub name: String,
        pub prices: HashMap<String, Decimal>,
        pub calls: AtomicUsize,
        pub requested: Mutex<Vec<Vec<String>>>,
        pub fail: Mutex<Option<ProviderError>>,
        pub delay: Option<Duration>,
    }

    impl FakeProvider {
        pub fn new(name: &str, prices: &[(&str, Decimal)]) -> Self {
            Self {
                name: name.to_string(),
                prices: prices.iter().map(|(s, p)| (s.to_string(), *p)).collect(),
                calls: AtomicUsize::new(0),
                requested: Mutex::new(vec![]),
                fail: Mutex::new(None),
                delay: None,
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn set_failure(&self, e: Option<ProviderError>) {
            *self.fail.lock().unwrap() = e;
        }
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch(
            &self,
            symbols: &[String],
            cancel: &CancellationToken,
        ) -> Result<Vec<Quote>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().unwrap().push(symbols.to_vec());
            if let Some(d) = self.delay {
                cancellable(cancel, async {
                    tokio::time::sleep(d).await;
                    Ok(())
                })
                .await?;
            }
            if let Some(e) = self.fail.lock().unwrap().clone() {
                return Err(e);
            }
            let symbols: Vec<String> = if symbols.is_empty() {
                let mut names: Vec<String> = self.prices.keys().cloned().collect();
                names.sort();
                names
            } else {
                symbols.to_vec()
            };
            Ok(symbols
                .iter()
                .filter_map(|s| {
                    self.prices.get(s).map(|p| {
                        Quote::new(
                            s.clone(),
                            *p,
                            "USD",
                            format!("{}:market", self.name),
                            DateTime::<Utc>::default(),
                        )
                    })
                })
                .collect())
        }
    }

    pub fn syms(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }
}
