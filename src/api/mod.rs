pub mod http;

pub use http::HttpMarketData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;
use crate::models::Candle;

/// Market-data access used by the engine.
///
/// `get_candles` must support native 1-minute resolution for the exact
/// timestamp work plus the active timeframe; `get_quote` is the optional
/// live-price path and may fail.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn get_candles(
        &self,
        symbol: &str,
        resolution_minutes: u32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    async fn get_quote(&self, symbol: &str) -> Result<f64>;
}
