use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use super::types::*;
use crate::config::SteamDtSettings;
use crate::error::ProviderError;
use crate::source::batch::{BatchClient, BatchPolicy, BatchUpstream};
use crate::source::Provider;
use crate::types::{epoch_maybe_millis, parse_decimal, source_tag, Quote, Side};

/// Raw batch endpoint: one POST per batch of market hash names.
pub struct SteamDtApi {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    headers: HeaderMap,
}

impl SteamDtApi {
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        extra_headers: &HashMap<String, String>,
    ) -> Result<Self, ProviderError> {
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
            endpoint: endpoint.into(),
            api_key: api_key.into().trim().to_string(),
            headers,
        })
    }
}

#[async_trait]
impl BatchUpstream for SteamDtApi {
    type Entry = Entry;

    async fn fetch_batch(
        &self,
        names: &[String],
        _cancel: &CancellationToken,
    ) -> Result<Vec<Entry>, ProviderError> {
        tracing::debug!(endpoint = %self.endpoint, batch = names.len(), "POST price batch");

        let resp = self
            .http
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .bearer_auth(&self.api_key)
            .json(&BatchRequest {
                market_hash_names: names,
            })
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status, &body));
        }

        let api: ApiResponse = serde_json::from_str(&body)?;
        if api.is_error() {
            return Err(ProviderError::Api {
                code: api.error_code,
                message: api.error_msg,
            });
        }
        Ok(api.data)
    }
}

/// One platform listing that carries at least one usable price.
#[derive(Debug, Clone)]
struct Candidate {
    platform: String,
    sell: Option<Decimal>,
    bid: Option<Decimal>,
    ts: DateTime<Utc>,
}

fn non_zero(text: &str) -> Option<Decimal> {
    parse_decimal(text).filter(|d| !d.is_zero())
}

/// Usable listings ordered by platform, then update time.
fn candidates(list: &[Listing], now: DateTime<Utc>) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = list
        .iter()
        .filter_map(|l| {
            let sell = non_zero(&l.sell_price);
            let bid = non_zero(&l.bidding_price);
            if sell.is_none() && bid.is_none() {
                return None;
            }
            Some(Candidate {
                platform: l.platform.clone(),
                sell,
                bid,
                ts: epoch_maybe_millis(l.update_time, now),
            })
        })
        .collect();
    out.sort_by(|a, b| a.platform.cmp(&b.platform).then(a.ts.cmp(&b.ts)));
    out
}

pub struct SteamDtProvider {
    name: String,
    currency: String,
    include_bids: bool,
    symbol_map: HashMap<String, String>,
    client: BatchClient<SteamDtApi>,
}

impl SteamDtProvider {
    pub fn new(s: &SteamDtSettings, api: SteamDtApi) -> Self {
        let policy = BatchPolicy {
            max_items_per_request: s.max_items_per_request,
            max_concurrency: s.max_concurrency,
            max_retries: s.max_retries,
            ..BatchPolicy::default()
        };
        Self {
            name: s.name.clone(),
            currency: s.currency.clone(),
            include_bids: s.include_bids,
            symbol_map: s
                .symbol_map
                .iter()
                .map(|a| (a.symbol.clone(), a.upstream.clone()))
                .collect(),
            client: BatchClient::new(api, policy),
        }
    }

    pub fn from_settings(s: &SteamDtSettings, http: reqwest::Client) -> Result<Self, ProviderError> {
        let api_key = s
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderError::Config("steamdt.api_key is not set".into()))?;
        let api = SteamDtApi::new(http, s.endpoint.clone(), api_key, &s.headers)?;
        Ok(Self::new(s, api))
    }

    fn upstream_key<'a>(&'a self, symbol: &'a str) -> &'a str {
        self.symbol_map
            .get(symbol)
            .map(String::as_str)
            .filter(|k| !k.is_empty())
            .unwrap_or(symbol)
    }
}

#[async_trait]
impl Provider for SteamDtProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        symbols: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Quote>, ProviderError> {
        let mut seen = HashSet::new();
        let keys: Vec<String> = symbols
            .iter()
            .map(|s| self.upstream_key(s))
            .filter(|k| seen.insert(*k))
            .map(str::to_string)
            .collect();

        let outcome = self.client.fetch_all(&keys, cancel).await;
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        if !outcome.skipped.is_empty() {
            tracing::warn!(
                provider = %self.name,
                skipped = ?outcome.skipped,
                "upstream rejected items individually, skipping"
            );
        }

        let by_name: HashMap<&str, &Entry> = outcome
            .entries
            .iter()
            .map(|e| (e.market_hash_name.as_str(), e))
            .collect();

        let now = Utc::now();
        let mut out = Vec::with_capacity(symbols.len() * 4);
        for sym in symbols {
            let Some(entry) = by_name.get(self.upstream_key(sym)) else {
                continue;
            };
            for c in candidates(&entry.data_list, now) {
                if let Some(sell) = c.sell {
                    out.push(Quote::new(
                        sym.clone(),
                        sell,
                        self.currency.clone(),
                        source_tag(&self.name, &c.platform, Some(Side::Sell)),
                        c.ts,
                    ));
                }
                if let (true, Some(bid)) = (self.include_bids, c.bid) {
                    out.push(Quote::new(
                        sym.clone(),
                        bid,
                        self.currency.clone(),
                        source_tag(&self.name, &c.platform, Some(Side::Bid)),
                        c.ts,
                    ));
                }
            }
        }

        match outcome.first_error {
            Some(e) if out.is_empty() => Err(e),
            Some(e) => {
                tracing::warn!(provider = %self.name, error = %e, quotes = out.len(), "partial batch failure");
                Ok(out)
            }
            None => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    use super::*;
    use crate::config::SymbolAlias;
    use crate::source::testing::syms;

    fn settings(endpoint: &str) -> SteamDtSettings {
        SteamDtSettings {
            enabled: true,
            name: "SteamDT".into(),
            endpoint: endpoint.into(),
            api_key: Some("secret".into()),
            currency: "CNY".into(),
            include_bids: true,
            max_items_per_request: 200,
            max_concurrency: 2,
            max_retries: 3,
            symbol_map: vec![],
            headers: HashMap::new(),
            chain: crate::config::ChainSettings {
                max_requests_per_minute: 0,
                burst: 0,
                min_request_interval_sec: 0,
                cache_ttl_sec: 0,
                cache_max_items: 0,
            },
        }
    }

    fn provider(s: &SteamDtSettings) -> SteamDtProvider {
        SteamDtProvider::from_settings(s, reqwest::Client::new()).unwrap()
    }

    fn redline_body() -> serde_json::Value {
        json!({
            "success": true,
            "data": [{
                "marketHashName": "AK-47 | Redline (Field-Tested)",
                "dataList": [
                    {"platform": "YOUPIN", "sellPrice": 101.5, "biddingPrice": 0,
                     "updateTime": 1_700_000_000_000_i64},
                    {"platform": "BUFF", "sellPrice": "100.00", "biddingPrice": "98.5",
                     "updateTime": 1_700_000_000},
                    {"platform": "C5", "sellPrice": 0, "biddingPrice": null, "updateTime": 1}
                ]
            }],
            "errorCode": 0,
            "errorMsg": ""
        })
    }

    #[test]
    fn candidates_drop_empty_listings_and_sort() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let entry: ApiResponse = serde_json::from_value(redline_body()).unwrap();
        let cs = candidates(&entry.data[0].data_list, now);
        let platforms: Vec<&str> = cs.iter().map(|c| c.platform.as_str()).collect();
        assert_eq!(platforms, vec!["BUFF", "YOUPIN"]);
        assert_eq!(cs[0].sell, Some(dec!(100.00)));
        assert_eq!(cs[1].bid, None);
        assert_eq!(cs[1].ts.timestamp_millis(), 1_700_000_000_000);
    }

    #[tokio::test]
    async fn fetch_emits_sell_and_bid_quotes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/batch"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(json!({"marketHashNames": ["AK-47 | Redline (Field-Tested)"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(redline_body()))
            .expect(1)
            .mount(&server)
            .await;

        let p = provider(&settings(&format!("{}/batch", server.uri())));
        let out = p
            .fetch(&syms(&["AK-47 | Redline (Field-Tested)"]), &CancellationToken::new())
            .await
            .unwrap();

        let tags: Vec<&str> = out.iter().map(|q| q.source.as_str()).collect();
        assert_eq!(
            tags,
            vec!["SteamDT:BUFF:sell", "SteamDT:BUFF:bid", "SteamDT:YOUPIN:sell"]
        );
        assert_eq!(out[0].price.to_string(), "100.00");
        assert_eq!(out[1].price, dec!(98.5));
        assert!(out.iter().all(|q| q.currency == "CNY"));
        assert_eq!(out[0].received_at.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn bids_are_omitted_when_disabled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(redline_body()))
            .mount(&server)
            .await;

        let mut s = settings(&server.uri());
        s.include_bids = false;
        let out = provider(&s)
            .fetch(&syms(&["AK-47 | Redline (Field-Tested)"]), &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.iter().all(|q| q.source.ends_with(":sell")));
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn symbol_map_translates_and_dedupes_keys() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({"marketHashNames": ["AK-47 | Redline (Field-Tested)"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(redline_body()))
            .expect(1)
            .mount(&server)
            .await;

        let mut s = settings(&server.uri());
        s.include_bids = false;
        s.symbol_map = vec![SymbolAlias {
            symbol: "redline".into(),
            upstream: "AK-47 | Redline (Field-Tested)".into(),
        }];
        let out = provider(&s)
            .fetch(
                &syms(&["redline", "AK-47 | Redline (Field-Tested)"]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let symbols: Vec<&str> = out.iter().map(|q| q.symbol.as_str()).collect();
        assert_eq!(
            symbols,
            vec![
                "redline",
                "redline",
                "AK-47 | Redline (Field-Tested)",
                "AK-47 | Redline (Field-Tested)"
            ]
        );
    }

    #[tokio::test]
    async fn failed_envelope_is_an_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false, "data": null, "errorCode": 4001, "errorMsg": "invalid key"
            })))
            .mount(&server)
            .await;

        let err = provider(&settings(&server.uri()))
            .fetch(&syms(&["x"]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::Api {
                code: 4001,
                message: "invalid key".into()
            }
        );
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("nope"))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&settings(&server.uri()))
            .fetch(&syms(&["x"]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { status: 401, .. }));
    }

    #[tokio::test]
    async fn oversize_batches_are_split_against_real_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(|req: &Request| {
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
                let names = body["marketHashNames"].as_array().unwrap();
                if names.len() > 2 {
                    return ResponseTemplate::new(413).set_body_string("too many items");
                }
                let data: Vec<_> = names
                    .iter()
                    .map(|n| json!({"marketHashName": n, "dataList": [
                        {"platform": "BUFF", "sellPrice": "1.5", "updateTime": 1_700_000_000}
                    ]}))
                    .collect();
                ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": data}))
            })
            .mount(&server)
            .await;

        let names = syms(&["a", "b", "c", "d", "e"]);
        let out = provider(&settings(&server.uri()))
            .fetch(&names, &CancellationToken::new())
            .await
            .unwrap();
        let got: Vec<&str> = out.iter().map(|q| q.symbol.as_str()).collect();
        assert_eq!(got, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let mut s = settings("http://localhost");
        s.api_key = Some("  ".into());
        let err = SteamDtProvider::from_settings(&s, reqwest::Client::new())
            .err()
            .unwrap();
        assert!(matches!(err, ProviderError::Config(_)));
    }
}
