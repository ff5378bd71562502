//! Fetches from every configured provider chain under one deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::aggregate::{latest_filtered, Latest, LatestFilter};
use crate::config::Settings;
use crate::error::{FetchError, ProviderError};
use crate::pricempire::PricempireProvider;
use crate::skinstable::SkinstableProvider;
use crate::source::{compose, Provider};
use crate::stats::Stats;
use crate::steamdt::SteamDtProvider;
use crate::types::Quote;

pub struct ProviderSet {
    providers: Vec<Arc<dyn Provider>>,
    stats: Option<Arc<Stats>>,
}

impl ProviderSet {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self {
            providers,
            stats: None,
        }
    }

    pub fn with_stats(mut self, stats: Arc<Stats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Union of quotes from every provider that answered before `timeout`.
    ///
    /// Fails only when no provider produced a quote and at least one failed.
    /// Providers still running at the deadline are reported as cancelled.
    pub async fn fetch_all(
        &self,
        symbols: &[String],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Quote>, FetchError> {
        if self.providers.is_empty() {
            return Err(FetchError::NoProviders);
        }

        let request_id = Uuid::new_v4();
        let started = Instant::now();
        let deadline = started + timeout;
        let token = cancel.child_token();
        // anything still waiting on this request stops once we return
        let _stop = token.clone().drop_guard();

        let tasks = self.providers.iter().map(|p| {
            let token = &token;
            async move {
                let res = match tokio::time::timeout_at(deadline, p.fetch(symbols, token)).await {
                    Ok(res) => res,
                    Err(_) => {
                        token.cancel();
                        Err(ProviderError::Cancelled)
                    }
                };
                (p.name().to_string(), res)
            }
        });
        let results = futures::future::join_all(tasks).await;

        let mut quotes: Vec<Quote> = Vec::new();
        let mut causes: Vec<(String, ProviderError)> = Vec::new();
        for (name, res) in results {
            match res {
                Ok(qs) => {
                    tracing::debug!(%request_id, provider = %name, quotes = qs.len(), "provider ok");
                    quotes.extend(qs);
                }
                Err(e) => {
                    tracing::warn!(%request_id, provider = %name, error = %e, "provider failed");
                    causes.push((name, e));
                }
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            %request_id,
            symbols = symbols.len(),
            quotes = quotes.len(),
            failures = causes.len(),
            elapsed_ms,
            "fan-out finished"
        );
        if let Some(stats) = &self.stats {
            stats.inc_pass();
            stats.add_quotes(quotes.len() as u64);
            stats.add_provider_failures(causes.len() as u64);
            stats.set_last_pass_ms(elapsed_ms);
        }

        if quotes.is_empty() && !causes.is_empty() {
            if let Some(stats) = &self.stats {
                stats.inc_failed_pass();
            }
            return Err(FetchError::NoQuotes { causes });
        }
        Ok(quotes)
    }

    /// `fetch_all` followed by the latest-per-market collapse.
    pub async fn latest(
        &self,
        symbols: &[String],
        timeout: Duration,
        cancel: &CancellationToken,
        include_sides: bool,
        filter: &LatestFilter,
    ) -> Result<Vec<Latest>, FetchError> {
        let quotes = self.fetch_all(symbols, timeout, cancel).await?;
        let rows = latest_filtered(&quotes, include_sides, filter);
        if let Some(stats) = &self.stats {
            stats.set_latest_rows(rows.len() as u64);
        }
        Ok(rows)
    }
}

/// Builds every enabled upstream wrapped in its configured rate limit and cache.
///
/// Upstreams that cannot be built (missing key or endpoint) are logged and skipped.
pub fn build_providers(s: &Settings, http: &reqwest::Client) -> Vec<Arc<dyn Provider>> {
    let mut out: Vec<Arc<dyn Provider>> = Vec::new();

    if s.steamdt.enabled {
        match SteamDtProvider::from_settings(&s.steamdt, http.clone()) {
            Ok(p) => out.push(compose(Arc::new(p), &s.steamdt.chain)),
            Err(e) => tracing::warn!(provider = %s.steamdt.name, error = %e, "provider disabled"),
        }
    }
    if s.pricempire.enabled {
        match PricempireProvider::from_settings(&s.pricempire, http.clone()) {
            Ok(p) => out.push(compose(Arc::new(p), &s.pricempire.chain)),
            Err(e) => tracing::warn!(provider = %s.pricempire.name, error = %e, "provider disabled"),
        }
    }
    if s.skinstable.enabled {
        match SkinstableProvider::from_settings(&s.skinstable, http.clone()) {
            Ok(p) => out.push(compose(Arc::new(p), &s.skinstable.chain)),
            Err(e) => tracing::warn!(provider = %s.skinstable.name, error = %e, "provider disabled"),
        }
    }

    tracing::info!(
        providers = ?out.iter().map(|p| p.name()).collect::<Vec<_>>(),
        "providers configured"
    );
    out
}
