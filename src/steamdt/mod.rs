//! SteamDT batch price API.

pub mod market_data;
pub mod types;

pub use market_data::{SteamDtApi, SteamDtProvider};
