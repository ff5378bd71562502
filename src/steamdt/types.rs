use serde::de::Deserializer;
use serde::{Deserialize, Serialize};

fn vec_or_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let opt = Option::<Vec<T>>::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

fn zero_if_null<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<i64>::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

/// Prices arrive as JSON numbers or strings; keep the exact text either way.
fn number_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match v {
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        _ => String::new(),
    })
}

#[derive(Debug, Serialize)]
pub struct BatchRequest<'a> {
    #[serde(rename = "marketHashNames")]
    pub market_hash_names: &'a [String],
}

/// Response envelope for the batch price endpoint
#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, deserialize_with = "vec_or_empty")]
    pub data: Vec<Entry>,
    #[serde(rename = "errorCode", default, deserialize_with = "zero_if_null")]
    pub error_code: i64,
    #[serde(rename = "errorMsg", default, deserialize_with = "string_or_empty")]
    pub error_msg: String,
}

impl ApiResponse {
    /// A failed envelope only counts as an error when it says why and carries no data.
    pub fn is_error(&self) -> bool {
        !self.success
            && (self.error_code != 0 || !self.error_msg.trim().is_empty())
            && self.data.is_empty()
    }
}

/// All platform listings for one item
#[derive(Debug, Clone, Deserialize)]
pub struct Entry {
    #[serde(rename = "marketHashName", default, deserialize_with = "string_or_empty")]
    pub market_hash_name: String,
    #[serde(rename = "dataList", default, deserialize_with = "vec_or_empty")]
    pub data_list: Vec<Listing>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Listing {
    #[serde(default, deserialize_with = "string_or_empty")]
    pub platform: String,
    #[serde(rename = "sellPrice", default, deserialize_with = "number_text")]
    pub sell_price: String,
    #[serde(rename = "sellCount", default)]
    pub sell_count: Option<i64>,
    #[serde(rename = "biddingPrice", default, deserialize_with = "number_text")]
    pub bidding_price: String,
    #[serde(rename = "biddingCount", default)]
    pub bidding_count: Option<i64>,
    // seconds or milliseconds
    #[serde(rename = "updateTime", default, deserialize_with = "zero_if_null")]
    pub update_time: i64,
}
