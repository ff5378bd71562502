//! SkinstableXYZ aggregated items payload, one request per site.

pub mod market_data;
pub mod types;

pub use market_data::{SkinstableApi, SkinstableProvider};
