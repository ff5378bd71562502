//! Collapses quotes from every provider into one latest row per market.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::types::{Quote, Side};

/// Newest observation for one (symbol, market, side, currency).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Latest {
    pub symbol: String,
    pub market: String,
    /// Empty when sides are collapsed or the provider never reports one.
    pub side: String,
    pub currency: String,
    pub price: Decimal,
    pub provider: String,
    pub received_at: DateTime<Utc>,
}

/// Lower-cased market spelling -> canonical name.
const MARKET_ALIASES: &[(&str, &str)] = &[
    ("buff", "BUFF"),
    ("buff.163", "BUFF"),
    ("buff163", "BUFF"),
    ("steam", "Steam"),
    ("c5", "C5GAME"),
    ("c5game", "C5GAME"),
    ("csmoney", "CS.MONEY"),
    ("cs.money", "CS.MONEY"),
    ("skinport", "Skinport"),
];

/// Unknown markets are only trimmed.
pub fn canonical_market(raw: &str) -> String {
    let m = raw.trim();
    let lower = m.to_ascii_lowercase();
    MARKET_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| m.to_string())
}

/// Providers whose tags are `name:market` with no side segment.
fn provider_has_side(provider: &str) -> bool {
    !matches!(
        provider.trim().to_ascii_lowercase().as_str(),
        "pricempire" | "skinstablexyz"
    )
}

/// Splits a source tag into a canonical market and a lower-cased side.
pub fn normalize_source(src: &str) -> (String, String) {
    let s = src.trim();
    if s.is_empty() {
        return (String::new(), String::new());
    }
    let parts: Vec<&str> = s.split(':').collect();
    let market = parts.get(1).copied().unwrap_or_default();
    let side = if provider_has_side(parts[0]) {
        parts.get(2).copied().unwrap_or_default()
    } else {
        ""
    };
    (canonical_market(market), side.trim().to_ascii_lowercase())
}

/// Prefix before the first ':' of a source tag.
fn provider_of(src: &str) -> &str {
    match src.find(':') {
        Some(idx) if idx > 0 => &src[..idx],
        _ => src,
    }
}

type GroupKey = (String, String, String, String);

/// Keeps the newest quote per (symbol, market, side, currency).
///
/// Ties on `received_at` go to the quote seen later. Quotes without a
/// timestamp are stamped with the current time first. Rows come back sorted
/// by symbol, market, side, then currency.
pub fn latest_by_market(quotes: &[Quote], include_sides: bool) -> Vec<Latest> {
    let now = Utc::now();
    let mut latest: HashMap<GroupKey, Latest> = HashMap::with_capacity(quotes.len());

    for q in quotes {
        let (market, side) = normalize_source(&q.source);
        let side = if include_sides { side } else { String::new() };
        let ts = if q.has_timestamp() { q.received_at } else { now };

        let key = (q.symbol.clone(), market.clone(), side.clone(), q.currency.clone());
        if let Some(cur) = latest.get(&key) {
            if ts < cur.received_at {
                continue;
            }
        }
        latest.insert(
            key,
            Latest {
                symbol: q.symbol.clone(),
                market,
                side,
                currency: q.currency.clone(),
                price: q.price,
                provider: provider_of(&q.source).to_string(),
                received_at: ts,
            },
        );
    }

    let mut out: Vec<Latest> = latest.into_values().collect();
    out.sort_by(|a, b| {
        (&a.symbol, &a.market, &a.side, &a.currency).cmp(&(&b.symbol, &b.market, &b.side, &b.currency))
    });
    out
}

/// Optional narrowing of the latest view.
#[derive(Debug, Clone, Default)]
pub struct LatestFilter {
    /// Selecting a side implies sides are kept apart.
    pub side: Option<Side>,
    /// Compared after alias normalization.
    pub market: Option<String>,
}

impl LatestFilter {
    /// Parses `sell`, `bid` or `all`/empty.
    pub fn parse_side(s: &str) -> Result<Option<Side>, String> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(None),
            "sell" => Ok(Some(Side::Sell)),
            "bid" => Ok(Some(Side::Bid)),
            other => Err(format!("unknown side {other:?}, want sell|bid|all")),
        }
    }
}

/// `latest_by_market` with side and market filters applied.
pub fn latest_filtered(quotes: &[Quote], include_sides: bool, filter: &LatestFilter) -> Vec<Latest> {
    let market = filter.market.as_deref().map(canonical_market);
    latest_by_market(quotes, include_sides || filter.side.is_some())
        .into_iter()
        .filter(|row| filter.side.map_or(true, |s| row.side == s.as_str()))
        .filter(|row| market.as_ref().map_or(true, |m| &row.market == m))
        .collect()
}
