//! Per-symbol TTL cache in front of a provider.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::Provider;
use crate::error::ProviderError;
use crate::types::Quote;

#[derive(Debug, Clone)]
struct CacheEntry {
    quotes: Vec<Quote>,
    expires_at: Instant,
}

/// Serves unexpired per-symbol results and fetches only the missing symbols.
pub struct CachedProvider {
    inner: Arc<dyn Provider>,
    ttl: Duration,
    /// Zero disables the cap.
    max_items: usize,
    items: RwLock<HashMap<String, CacheEntry>>,
}

impl CachedProvider {
    pub fn new(inner: Arc<dyn Provider>, ttl: Duration, max_items: usize) -> Self {
        Self {
            inner,
            ttl,
            max_items,
            items: RwLock::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.items.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    fn store(&self, fresh: &HashMap<String, Vec<Quote>>) {
        let expires_at = Instant::now() + self.ttl;
        let mut items = self.items.write().unwrap_or_else(|p| p.into_inner());
        for (sym, quotes) in fresh {
            items.insert(
                sym.clone(),
                CacheEntry {
                    quotes: quotes.clone(),
                    expires_at,
                },
            );
        }
        evict(&mut items, self.max_items, Instant::now());
    }
}

/// Drops expired entries, then the soonest-expiring ones, until under `max_items`.
fn evict(items: &mut HashMap<String, CacheEntry>, max_items: usize, now: Instant) {
    if max_items == 0 || items.len() <= max_items {
        return;
    }
    let before = items.len();
    items.retain(|_, e| now < e.expires_at);

    if items.len() > max_items {
        let mut by_expiry: Vec<(Instant, String)> = items
            .iter()
            .map(|(k, e)| (e.expires_at, k.clone()))
            .collect();
        by_expiry.sort();
        let excess = items.len() - max_items;
        for (_, k) in by_expiry.into_iter().take(excess) {
            items.remove(&k);
        }
    }
    tracing::debug!(before, after = items.len(), max_items, "cache evicted entries");
}

/// Emits quotes in the caller's symbol order, preferring fresh over cached.
fn assemble(
    symbols: &[String],
    cached: &HashMap<String, Vec<Quote>>,
    fresh: &HashMap<String, Vec<Quote>>,
) -> Vec<Quote> {
    let mut out = Vec::with_capacity(symbols.len());
    for s in symbols {
        if let Some(qs) = fresh.get(s).or_else(|| cached.get(s)) {
            out.extend(qs.iter().cloned());
        }
    }
    out
}

#[async_trait]
impl Provider for CachedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch(
        &self,
        symbols: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Quote>, ProviderError> {
        // an empty request asks the inner provider for everything it has
        if self.ttl.is_zero() || symbols.is_empty() {
            return self.inner.fetch(symbols, cancel).await;
        }

        let now = Instant::now();
        let mut cached: HashMap<String, Vec<Quote>> = HashMap::new();
        let mut missing: Vec<String> = Vec::new();
        {
            let items = self.items.read().unwrap_or_else(|p| p.into_inner());
            let mut seen = HashSet::new();
            for s in symbols {
                match items.get(s) {
                    Some(e) if now < e.expires_at => {
                        cached.entry(s.clone()).or_insert_with(|| e.quotes.clone());
                    }
                    _ => {
                        if seen.insert(s.as_str()) {
                            missing.push(s.clone());
                        }
                    }
                }
            }
        }

        if missing.is_empty() {
            tracing::debug!(provider = self.name(), hits = cached.len(), "cache hit");
            return Ok(assemble(symbols, &cached, &HashMap::new()));
        }

        tracing::debug!(
            provider = self.name(),
            hits = cached.len(),
            missing = missing.len(),
            "cache miss, fetching missing symbols"
        );

        let fetched = match self.inner.fetch(&missing, cancel).await {
            Ok(q) => q,
            Err(ProviderError::Cancelled) => return Err(ProviderError::Cancelled),
            Err(e) if !cached.is_empty() => {
                tracing::warn!(
                    provider = self.name(),
                    error = %e,
                    served = cached.len(),
                    "upstream failed, serving cached subset"
                );
                return Ok(assemble(symbols, &cached, &HashMap::new()));
            }
            Err(e) => return Err(e),
        };

        let mut fresh: HashMap<String, Vec<Quote>> = HashMap::with_capacity(missing.len());
        for q in fetched {
            fresh.entry(q.symbol.clone()).or_default().push(q);
        }
        self.store(&fresh);

        Ok(assemble(symbols, &cached, &fresh))
    }
}
