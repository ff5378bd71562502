//! Provider over upstreams that serve one full payload per dimension ("site").
//!
//! Each site's payload is cached until its TTL runs out. Concurrent refreshes of
//! one site share a single upstream call, and a refreshed payload is committed
//! only if the cached entry is still expired when the refresh lands.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{join_all, FutureExt};
use rust_decimal::Decimal;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::coalesce::Coalescer;
use super::Provider;
use crate::error::ProviderError;
use crate::types::Quote;

pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(7);

/// One market's price for an item inside a site payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadPrice {
    pub market: String,
    pub price: Decimal,
    /// `None` when the upstream sent no usable timestamp.
    pub received_at: Option<DateTime<Utc>>,
}

/// Item name to the prices listed for it.
pub type SitePayload = HashMap<String, Vec<PayloadPrice>>;

#[async_trait]
pub trait PayloadUpstream: Send + Sync + 'static {
    async fn fetch_site(
        &self,
        site: &str,
        cancel: &CancellationToken,
    ) -> Result<SitePayload, ProviderError>;
}

#[derive(Debug, Clone)]
struct SiteEntry {
    items: Arc<SitePayload>,
    until: Instant,
}

pub struct PayloadCache<U> {
    name: String,
    currency: String,
    sites: Vec<String>,
    ttl: Duration,
    refresh_timeout: Duration,
    upstream: Arc<U>,
    entries: RwLock<HashMap<String, SiteEntry>>,
    inflight: Coalescer<Arc<SitePayload>>,
}

impl<U: PayloadUpstream> PayloadCache<U> {
    pub fn new(
        name: impl Into<String>,
        currency: impl Into<String>,
        sites: Vec<String>,
        ttl: Duration,
        upstream: U,
    ) -> Self {
        Self {
            name: name.into(),
            currency: currency.into(),
            sites,
            ttl,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            upstream: Arc::new(upstream),
            entries: RwLock::new(HashMap::new()),
            inflight: Coalescer::new(),
        }
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    fn valid(&self, site: &str, now: Instant) -> Option<Arc<SitePayload>> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries
            .get(site)
            .filter(|e| now < e.until)
            .map(|e| Arc::clone(&e.items))
    }

    /// Stores `items` unless another refresh already committed a live entry.
    fn commit(&self, site: &str, items: Arc<SitePayload>) {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        match entries.get(site) {
            Some(e) if now < e.until => {
                tracing::debug!(provider = %self.name, site, "newer payload already committed");
            }
            _ => {
                entries.insert(
                    site.to_string(),
                    SiteEntry {
                        items,
                        until: now + self.ttl,
                    },
                );
            }
        }
    }

    async fn refresh(
        &self,
        site: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<SitePayload>, ProviderError> {
        let upstream = Arc::clone(&self.upstream);
        // Outlives any one caller; waiters stop waiting through `cancel` instead.
        let token = CancellationToken::new();
        let timeout = self.refresh_timeout;
        let owned_site = site.to_string();
        let provider = self.name.clone();

        let items = self
            .inflight
            .run(site, cancel, move || {
                async move {
                    tracing::debug!(provider = %provider, site = %owned_site, "refreshing site payload");
                    let fetch = upstream.fetch_site(&owned_site, &token);
                    match tokio::time::timeout(timeout, fetch).await {
                        Ok(res) => res.map(Arc::new),
                        Err(_) => Err(ProviderError::Transport(format!(
                            "site {owned_site} refresh timed out after {timeout:?}"
                        ))),
                    }
                }
                .boxed()
            })
            .await?;

        self.commit(site, Arc::clone(&items));
        // whichever payload won the commit is what callers see
        Ok(self.valid(site, Instant::now()).unwrap_or(items))
    }

    async fn site_payload(
        &self,
        site: &str,
        now: Instant,
        cancel: &CancellationToken,
    ) -> Result<Arc<SitePayload>, ProviderError> {
        match self.valid(site, now) {
            Some(items) => Ok(items),
            None => self.refresh(site, cancel).await,
        }
    }

    fn emit(
        &self,
        site_items: &[Arc<SitePayload>],
        symbols: &[String],
        now: DateTime<Utc>,
    ) -> Vec<Quote> {
        let mut out = Vec::with_capacity(symbols.len());
        for items in site_items {
            let mut push = |symbol: &str, prices: &[PayloadPrice]| {
                for p in prices {
                    out.push(Quote::new(
                        symbol,
                        p.price,
                        self.currency.clone(),
                        format!("{}:{}", self.name, p.market),
                        p.received_at.unwrap_or(now),
                    ));
                }
            };
            if symbols.is_empty() {
                let mut names: Vec<&String> = items.keys().collect();
                names.sort();
                for name in names {
                    push(name, &items[name]);
                }
            } else {
                for s in symbols {
                    if let Some(prices) = items.get(s) {
                        push(s, prices);
                    }
                }
            }
        }
        out
    }
}

#[async_trait]
impl<U: PayloadUpstream> Provider for PayloadCache<U> {
    fn name(&self) -> &str {
        &self.name
    }

    /// An empty `symbols` slice returns every item in the cached payloads.
    async fn fetch(
        &self,
        symbols: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Quote>, ProviderError> {
        if self.sites.is_empty() {
            return Err(ProviderError::Config(format!("{}: no sites configured", self.name)));
        }

        let now = Instant::now();
        let results = join_all(
            self.sites
                .iter()
                .map(|site| self.site_payload(site, now, cancel)),
        )
        .await;

        let mut site_items = Vec::with_capacity(results.len());
        let mut last_err = None;
        for (site, res) in self.sites.iter().zip(results) {
            match res {
                Ok(items) => site_items.push(items),
                Err(ProviderError::Cancelled) if cancel.is_cancelled() => {
                    return Err(ProviderError::Cancelled)
                }
                Err(e) => {
                    tracing::warn!(provider = %self.name, site = %site, error = %e, "site refresh failed");
                    last_err = Some(e);
                }
            }
        }

        if site_items.is_empty() {
            return Err(last_err.unwrap_or(ProviderError::NoData));
        }
        Ok(self.emit(&site_items, symbols, Utc::now()))
    }
}
