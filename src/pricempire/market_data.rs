use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT};
use tokio_util::sync::CancellationToken;

use super::types::*;
use crate::config::PricempireSettings;
use crate::error::ProviderError;
use crate::source::{PayloadCache, PayloadPrice, PayloadUpstream, SitePayload};
use crate::types::parse_decimal;

/// The whole v3 price list behind a single cached dimension.
pub type PricempireProvider = PayloadCache<PricempireApi>;

pub struct PricempireApi {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    app_id: u32,
    currency: String,
    sources: Vec<String>,
}

impl PricempireApi {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        app_id: u32,
        currency: impl Into<String>,
        sources: Vec<String>,
    ) -> Self {
        let sources = if sources.is_empty() {
            vec!["buff".to_string()]
        } else {
            sources
        };
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            app_id: if app_id == 0 { 730 } else { app_id },
            currency: currency.into(),
            sources,
        }
    }

    /// Cache key for the single dimension this API serves.
    pub fn dimension(&self) -> String {
        self.sources.join(",")
    }

    pub async fn get_all_items(&self) -> Result<Vec<Item>, ProviderError> {
        let url = format!("{}/v3/items/prices", self.base_url);
        let mut query: Vec<(&str, String)> = Vec::with_capacity(3 + self.sources.len());
        if let Some(key) = &self.api_key {
            query.push(("api_key", key.clone()));
        }
        query.push(("appId", self.app_id.to_string()));
        query.push(("currency", self.currency.clone()));
        for s in &self.sources {
            query.push(("sources", s.clone()));
        }

        tracing::debug!(url = %url, sources = ?self.sources, "GET all items");
        let resp = self
            .http
            .get(&url)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .query(&query)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            let body = if status.as_u16() == 400 {
                format!("bad request with sources={:?}: {body}", self.sources)
            } else {
                body
            };
            return Err(ProviderError::from_status(status, &body));
        }
        decode_items(&body, &self.sources)
    }
}

#[async_trait]
impl PayloadUpstream for PricempireApi {
    async fn fetch_site(
        &self,
        _site: &str,
        _cancel: &CancellationToken,
    ) -> Result<SitePayload, ProviderError> {
        let items = self.get_all_items().await?;
        let mut out = SitePayload::with_capacity(items.len());
        for it in items {
            let mut prices: Vec<PayloadPrice> = it
                .prices
                .into_iter()
                .filter_map(|(source, p)| {
                    let price = p.price.and_then(|n| parse_decimal(&n.to_string()))?;
                    Some(PayloadPrice {
                        market: source,
                        price,
                        received_at: p.created_at,
                    })
                })
                .collect();
            if prices.is_empty() {
                continue;
            }
            prices.sort_by(|a, b| a.market.cmp(&b.market));
            out.insert(it.name, prices);
        }
        Ok(out)
    }
}

impl PricempireProvider {
    pub fn from_settings(s: &PricempireSettings, http: reqwest::Client) -> Result<Self, ProviderError> {
        if s.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return Err(ProviderError::Config("pricempire.api_key is not set".into()));
        }
        let api = PricempireApi::new(
            http,
            s.base_url.clone(),
            s.api_key.clone(),
            s.app_id,
            s.currency.clone(),
            s.sources.clone(),
        );
        let dimension = api.dimension();
        Ok(PayloadCache::new(
            s.name.clone(),
            s.currency.clone(),
            vec![dimension],
            Duration::from_secs(s.items_cache_ttl_sec.max(1)),
            api,
        ))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::ChainSettings;
    use crate::source::testing::syms;
    use crate::source::Provider;

    fn settings(base_url: String) -> PricempireSettings {
        PricempireSettings {
            enabled: true,
            name: "Pricempire".into(),
            base_url,
            api_key: Some("k".into()),
            app_id: 730,
            currency: "USD".into(),
            sources: syms(&["buff", "steam"]),
            items_cache_ttl_sec: 15,
            chain: ChainSettings {
                max_requests_per_minute: 0,
                burst: 0,
                min_request_interval_sec: 0,
                cache_ttl_sec: 0,
                cache_max_items: 0,
            },
        }
    }

    fn body() -> serde_json::Value {
        json!({
            "AK-47 | Redline (Field-Tested)": {
                "liquidity": 80.1,
                "buff": {"price": 32.5, "count": 43, "createdAt": "2024-05-01T10:00:00Z"},
                "steam": {"price": 41}
            },
            "AWP | Asiimov (Field-Tested)": {
                "liquidity": null,
                "buff": null
            }
        })
    }

    #[tokio::test]
    async fn quotes_one_row_per_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/items/prices"))
            .and(query_param("api_key", "k"))
            .and(query_param("appId", "730"))
            .and(query_param("currency", "USD"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body()))
            .expect(1)
            .mount(&server)
            .await;

        let p = PricempireProvider::from_settings(&settings(server.uri()), reqwest::Client::new())
            .unwrap();
        let cancel = CancellationToken::new();
        let out = p
            .fetch(&syms(&["AK-47 | Redline (Field-Tested)"]), &cancel)
            .await
            .unwrap();

        let tags: Vec<&str> = out.iter().map(|q| q.source.as_str()).collect();
        assert_eq!(tags, vec!["Pricempire:buff", "Pricempire:steam"]);
        assert_eq!(out[0].price, dec!(32.5));
        assert_eq!(out[0].received_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        assert!(out[1].has_timestamp());

        // the cached payload serves the next call
        p.fetch(&syms(&["AWP | Asiimov (Field-Tested)"]), &cancel)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_request_returns_every_priced_item() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body()))
            .mount(&server)
            .await;

        let p = PricempireProvider::from_settings(&settings(server.uri()), reqwest::Client::new())
            .unwrap();
        let out = p.fetch(&[], &CancellationToken::new()).await.unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|q| q.symbol == "AK-47 | Redline (Field-Tested)"));
    }

    #[tokio::test]
    async fn statuses_map_to_error_classes() {
        for status in [400u16, 403, 429] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;
            let api = PricempireApi::new(
                reqwest::Client::new(),
                server.uri(),
                Some("k".into()),
                730,
                "USD",
                syms(&["buff"]),
            );
            let err = api.get_all_items().await.unwrap_err();
            let ok = match status {
                400 => matches!(err, ProviderError::Oversize { status: 400, .. }),
                403 => matches!(err, ProviderError::Rejected { status: 403, .. }),
                _ => matches!(err, ProviderError::Transient { status: 429, .. }),
            };
            assert!(ok, "status {status} gave {err:?}");
        }
    }

    #[test]
    fn api_key_is_required() {
        let mut s = settings("http://localhost".into());
        s.api_key = None;
        assert!(matches!(
            PricempireProvider::from_settings(&s, reqwest::Client::new()),
            Err(ProviderError::Config(_))
        ));
    }
}
