use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use tokio_util::sync::CancellationToken;

use super::types::*;
use crate::config::SkinstableSettings;
use crate::error::ProviderError;
use crate::source::{PayloadCache, PayloadPrice, PayloadUpstream, SitePayload};
use crate::types::{epoch_maybe_millis, parse_decimal};

/// Refresh-coalescing cache over [`SkinstableApi`], one dimension per site.
pub type SkinstableProvider = PayloadCache<SkinstableApi>;

pub struct SkinstableApi {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    app_id: u32,
    headers: HeaderMap,
}

impl SkinstableApi {
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        app_id: u32,
        extra_headers: &HashMap<String, String>,
    ) -> Result<Self, ProviderError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(ProviderError::Config("skinstable endpoint is empty".into()));
        }
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        for (k, v) in extra_headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| ProviderError::Config(format!("header name {k:?}: {e}")))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| ProviderError::Config(format!("header value for {k:?}: {e}")))?;
            headers.insert(name, value);
        }
        Ok(Self {
            http,
            endpoint,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            app_id,
            headers,
        })
    }

    fn convert(site: &str, resp: ApiResponse) -> SitePayload {
        let now = Utc::now();
        resp.items
            .into_iter()
            .filter_map(|(name, item)| {
                let price = item.p.and_then(|n| parse_decimal(&n.to_string()))?;
                let received_at = (item.t > 0).then(|| epoch_maybe_millis(item.t, now));
                Some((
                    name,
                    vec![PayloadPrice {
                        market: site.to_string(),
                        price,
                        received_at,
                    }],
                ))
            })
            .collect()
    }
}

#[async_trait]
impl PayloadUpstream for SkinstableApi {
    async fn fetch_site(
        &self,
        site: &str,
        _cancel: &CancellationToken,
    ) -> Result<SitePayload, ProviderError> {
        let mut query: Vec<(&str, String)> = Vec::with_capacity(3);
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.clone()));
        }
        if self.app_id > 0 {
            query.push(("app", self.app_id.to_string()));
        }
        if !site.is_empty() {
            query.push(("site", site.to_string()));
        }

        tracing::debug!(endpoint = %self.endpoint, site, "GET items payload");
        let resp = self
            .http
            .get(&self.endpoint)
            .headers(self.headers.clone())
            .query(&query)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status, &body));
        }
        let resp: ApiResponse = serde_json::from_str(&body)?;
        tracing::debug!(site, items = resp.items.len(), requests = ?resp.requests, "items payload decoded");
        Ok(Self::convert(site, resp))
    }
}

impl SkinstableProvider {
    pub fn from_settings(s: &SkinstableSettings, http: reqwest::Client) -> Result<Self, ProviderError> {
        let endpoint = s
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ProviderError::Config("skinstable.endpoint is not set".into()))?;
        let api = SkinstableApi::new(http, endpoint, s.api_key.clone(), s.app_id, &s.headers)?;
        let sites = if s.sites.is_empty() {
            vec!["CS.MONEY".to_string()]
        } else {
            s.sites.clone()
        };
        Ok(PayloadCache::new(
            s.name.clone(),
            s.currency.clone(),
            sites,
            Duration::from_secs(s.items_cache_ttl_sec.max(1)),
            api,
        )
        .with_refresh_timeout(Duration::from_secs(s.refresh_timeout_sec.max(1))))
    }
}
