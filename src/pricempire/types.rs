use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::ProviderError;

/// Per-source block inside an item, e.g. `"buff": {...}`
#[derive(Debug, Clone, Deserialize)]
pub struct SourcePrice {
    #[serde(default)]
    pub price: Option<serde_json::Number>,
    #[serde(default)]
    pub count: Option<serde_json::Number>,
    #[serde(default)]
    pub avg30: Option<serde_json::Number>,
    #[serde(rename = "isInflated", default)]
    pub is_inflated: Option<bool>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Item {
    pub name: String,
    pub liquidity: Option<serde_json::Number>,
    /// Only the requested sources that were present and non-null.
    pub prices: HashMap<String, SourcePrice>,
}

/// The v3 body is `{ name: { "liquidity": n, "<source>": {...}, ... } }`;
/// the per-source keys depend on the request, so decode it by hand.
pub fn decode_items(body: &str, sources: &[String]) -> Result<Vec<Item>, ProviderError> {
    let raw: HashMap<String, serde_json::Map<String, serde_json::Value>> =
        serde_json::from_str(body)?;

    let mut items = Vec::with_capacity(raw.len());
    for (name, mut fields) in raw {
        let liquidity = match fields.remove("liquidity") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::Number(n)) => Some(n),
            Some(other) => {
                return Err(ProviderError::Decode(format!(
                    "{name}: liquidity is not a number: {other}"
                )))
            }
        };

        let mut prices = HashMap::new();
        for source in sources {
            let Some(v) = fields.remove(source.as_str()).filter(|v| !v.is_null()) else {
                continue;
            };
            let p: SourcePrice = serde_json::from_value(v)
                .map_err(|e| ProviderError::Decode(format!("{name}.{source}: {e}")))?;
            prices.insert(source.clone(), p);
        }

        items.push(Item {
            name,
            liquidity,
            prices,
        });
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn decodes_requested_sources_only() {
        let body = r#"{
            "AK-47 | Redline (Field-Tested)": {
                "liquidity": 53.555,
                "buff": {"isInflated": false, "price": 32, "count": 43, "avg30": 28,
                         "createdAt": "2023-02-02T12:13:07.393Z"},
                "steam": {"price": 40},
                "skinport": null
            }
        }"#;
        let items = decode_items(body, &sources(&["buff", "skinport"])).unwrap();
        assert_eq!(items.len(), 1);
        let it = &items[0];
        assert_eq!(it.liquidity.as_ref().map(|n| n.to_string()).as_deref(), Some("53.555"));
        assert_eq!(it.prices.len(), 1);
        let buff = &it.prices["buff"];
        assert_eq!(buff.price.as_ref().map(|n| n.to_string()).as_deref(), Some("32"));
        assert_eq!(buff.is_inflated, Some(false));
        assert_eq!(
            buff.created_at.map(|t| t.timestamp_millis()),
            Some(1_675_339_987_393)
        );
    }

    #[test]
    fn wrong_types_are_decode_errors() {
        let body = r#"{"x": {"buff": {"price": "cheap"}}}"#;
        let err = decode_items(body, &sources(&["buff"])).unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));

        let body = r#"{"x": {"liquidity": "high"}}"#;
        assert!(decode_items(body, &sources(&["buff"])).is_err());

        let body = r#"{"x": {"buff": {"price": 1, "createdAt": "yesterday"}}}"#;
        assert!(decode_items(body, &sources(&["buff"])).is_err());
    }
}
