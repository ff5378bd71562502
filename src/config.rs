use std::collections::HashMap;
use std::time::Duration;

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError};
use serde::Deserialize;

/// Rate limit and cache policy applied around one upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainSettings {
    /// Token bucket rate; zero falls back to `min_request_interval_sec`.
    pub max_requests_per_minute: u32,
    pub burst: u32,
    pub min_request_interval_sec: u64,
    /// Zero disables the per-symbol cache.
    pub cache_ttl_sec: u64,
    pub cache_max_items: usize,
}

/// Maps an aggregate symbol to the upstream's own item key.
///
/// A list rather than a table: config keys are case-folded, item names are not.
#[derive(Debug, Clone, Deserialize)]
pub struct SymbolAlias {
    pub symbol: String,
    pub upstream: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SteamDtSettings {
    pub enabled: bool,
    pub name: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub currency: String,
    pub include_bids: bool,
    pub max_items_per_request: usize,
    pub max_concurrency: usize,
    pub max_retries: u32,
    #[serde(default)]
    pub symbol_map: Vec<SymbolAlias>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub chain: ChainSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricempireSettings {
    pub enabled: bool,
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub app_id: u32,
    pub currency: String,
    pub sources: Vec<String>,
    pub items_cache_ttl_sec: u64,
    pub chain: ChainSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SkinstableSettings {
    pub enabled: bool,
    pub name: String,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub app_id: u32,
    pub currency: String,
    pub sites: Vec<String>,
    pub items_cache_ttl_sec: u64,
    pub refresh_timeout_sec: u64,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub chain: ChainSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub symbols: Vec<String>,
    pub request_timeout_sec: u64,
    /// Keep sell and bid rows apart in the latest-price view.
    pub include_sides: bool,
    pub poll_ms: u64,

    // Stats
    pub stats_log_sec: u64,

    pub user_agent: String,

    pub steamdt: SteamDtSettings,
    pub pricempire: PricempireSettings,
    pub skinstable: SkinstableSettings,
}

impl Settings {
    /// Defaults, then the file named by `CONFIG_FILE`, then the environment
    /// (`__` separates sections, e.g. `STEAMDT__API_KEY`).
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut b = with_defaults(config::Config::builder())?;
        if let Some(path) = std::env::var("CONFIG_FILE")
            .ok()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
        {
            tracing::info!(path = %path, "loading config file");
            b = b.add_source(config::File::with_name(&path));
        }
        let env = config::Environment::default()
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("symbols")
            .with_list_parse_key("pricempire.sources")
            .with_list_parse_key("skinstable.sites")
            .try_parsing(true);
        let c = b.add_source(env).build()?;
        Ok(c.try_deserialize()?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec.max(1))
    }
}

/// Registers every default; explicit sources always override these.
pub fn with_defaults(
    b: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let b = b
        .set_default("symbols", Vec::<String>::new())?
        .set_default("request_timeout_sec", 10)?
        .set_default("include_sides", false)?
        .set_default("poll_ms", 5000)?
        .set_default("stats_log_sec", 60)?
        .set_default("user_agent", "price-provider/1.0")?
        // SteamDT
        .set_default("steamdt.enabled", true)?
        .set_default("steamdt.name", "SteamDT")?
        .set_default(
            "steamdt.endpoint",
            "https://open.steamdt.com/open/cs2/v1/price/batch",
        )?
        .set_default("steamdt.currency", "CNY")?
        .set_default("steamdt.include_bids", true)?
        .set_default("steamdt.max_items_per_request", 200)?
        .set_default("steamdt.max_concurrency", 2)?
        .set_default("steamdt.max_retries", 3)?
        // Pricempire
        .set_default("pricempire.enabled", false)?
        .set_default("pricempire.name", "Pricempire")?
        .set_default("pricempire.base_url", "https://api.pricempire.com")?
        .set_default("pricempire.app_id", 730)?
        .set_default("pricempire.currency", "USD")?
        .set_default("pricempire.sources", vec!["buff"])?
        .set_default("pricempire.items_cache_ttl_sec", 15)?
        // Skinstable
        .set_default("skinstable.enabled", false)?
        .set_default("skinstable.name", "SkinstableXYZ")?
        .set_default("skinstable.app_id", 730)?
        .set_default("skinstable.currency", "USD")?
        .set_default("skinstable.sites", vec!["CS.MONEY"])?
        .set_default("skinstable.items_cache_ttl_sec", 15)?
        .set_default("skinstable.refresh_timeout_sec", 7)?;

    let b = chain_defaults(b, "steamdt", 1, 1, 3, 10_000)?;
    let b = chain_defaults(b, "pricempire", 2, 2, 15, 50_000)?;
    chain_defaults(b, "skinstable", 2, 2, 15, 50_000)
}

fn chain_defaults(
    b: ConfigBuilder<DefaultState>,
    section: &str,
    rpm: i64,
    burst: i64,
    ttl_sec: i64,
    max_items: i64,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    b.set_default(format!("{section}.chain.max_requests_per_minute"), rpm)?
        .set_default(format!("{section}.chain.burst"), burst)?
        .set_default(format!("{section}.chain.min_request_interval_sec"), 0)?
        .set_default(format!("{section}.chain.cache_ttl_sec"), ttl_sec)?
        .set_default(format!("{section}.chain.cache_max_items"), max_items)
}
