//! Resilient multi-upstream price fetching for tradable items.
//!
//! Upstreams implement [`source::Provider`]; [`source::compose`] stacks rate
//! limiting and a TTL cache on top, and [`fanout::ProviderSet`] queries every
//! chain under one deadline before [`aggregate`] collapses the quotes.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod fanout;
pub mod http;
pub mod pricempire;
pub mod skinstable;
pub mod source;
pub mod stats;
pub mod steamdt;
pub mod types;

pub use aggregate::{latest_by_market, normalize_source, Latest, LatestFilter};
pub use error::{FetchError, ProviderError, RetryClass};
pub use fanout::{build_providers, ProviderSet};
pub use source::{compose, Provider};
pub use types::{Quote, Side};
