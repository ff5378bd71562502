use std::collections::HashMap;

use serde::de::Deserializer;
use serde::Deserialize;

fn map_or_empty<'de, D, T>(deserializer: D) -> Result<HashMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let opt = Option::<HashMap<String, T>>::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

fn zero_if_null<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<i64>::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

/// Full items payload for one site
#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    #[serde(default, deserialize_with = "map_or_empty")]
    pub items: HashMap<String, Item>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub requests: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Item {
    /// Price; null when the site has no listing.
    #[serde(default)]
    pub p: Option<serde_json::Number>,
    /// Update time, seconds or milliseconds.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub t: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_items_and_null_prices() {
        let body = r#"{"items": {
            "AK-47 | Redline (Field-Tested)": {"p": 12.34, "t": 1700000000000},
            "Sticker | Foo": {"p": null, "t": 0}
        }, "time": 1700000000, "requests": 5}"#;
        let resp: ApiResponse = serde_json::from_str(body).unwrap();
        let redline = &resp.items["AK-47 | Redline (Field-Tested)"];
        assert_eq!(redline.p.as_ref().map(|n| n.to_string()).as_deref(), Some("12.34"));
        assert!(resp.items["Sticker | Foo"].p.is_none());

        let empty: ApiResponse = serde_json::from_str(r#"{"items": null}"#).unwrap();
        assert!(empty.items.is_empty());
    }

    #[test]
    fn null_update_time_decodes_as_unset() {
        let body = r#"{"items": {"AK-47 | Redline (Field-Tested)": {"p": 3.2, "t": null}}}"#;
        let resp: ApiResponse = serde_json::from_str(body).unwrap();
        let item = &resp.items["AK-47 | Redline (Field-Tested)"];
        assert_eq!(item.t, 0);
        assert_eq!(item.p.as_ref().map(|n| n.to_string()).as_deref(), Some("3.2"));
    }
}
