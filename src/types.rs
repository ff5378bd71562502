use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One normalized price observation for a symbol from one upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: Decimal,
    pub currency: String,
    /// Composite tag `provider[:market[:side]]`.
    pub source: String,
    /// The Unix epoch (`Default`) means the upstream gave no timestamp.
    pub received_at: DateTime<Utc>,
}

impl Quote {
    pub fn new(
        symbol: impl Into<String>,
        price: Decimal,
        currency: impl Into<String>,
        source: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            currency: currency.into(),
            source: source.into(),
            received_at,
        }
    }

    pub fn has_timestamp(&self) -> bool {
        self.received_at != DateTime::<Utc>::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Sell,
    Bid,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Sell => "sell",
            Side::Bid => "bid",
        }
    }
}

/// Builds `provider:market` or `provider:market:side`.
pub fn source_tag(provider: &str, market: &str, side: Option<Side>) -> String {
    match side {
        Some(s) => format!("{}:{}:{}", provider, market, s.as_str()),
        None => format!("{}:{}", provider, market),
    }
}

/// Parses a decimal from upstream text, accepting exponent notation.
/// Empty, NaN and infinite inputs yield `None`.
pub fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_scientific(s).ok())
}

/// Upstream epochs are seconds or milliseconds; values above 10^12 are millis.
pub fn epoch_maybe_millis(v: i64, fallback: DateTime<Utc>) -> DateTime<Utc> {
    if v <= 0 {
        return fallback;
    }
    let ts = if v > 1_000_000_000_000 {
        Utc.timestamp_millis_opt(v).single()
    } else {
        Utc.timestamp_opt(v, 0).single()
    };
    ts.unwrap_or(fallback)
}
