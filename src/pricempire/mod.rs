//! Pricempire v3 "all items" price list.

pub mod market_data;
pub mod types;

pub use market_data::{PricempireApi, PricempireProvider};
