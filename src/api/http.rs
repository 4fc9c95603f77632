use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::api::MarketData;
use crate::models::Candle;
use crate::{Error, Result};

/// HTTP client for the candle/quote service (JSON over REST)
#[derive(Clone)]
pub struct HttpMarketData {
    client: Client,
    base_url: String,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct CandlesResponse {
    candles: Vec<CandleRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandleRaw {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    price: f64,
}

// ============== Implementation ==============

impl HttpMarketData {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl MarketData for HttpMarketData {
    async fn get_candles(
        &self,
        symbol: &str,
        resolution_minutes: u32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/candles?symbol={}&resolution={}&from={}&to={}",
            self.base_url,
            symbol,
            resolution_minutes,
            from.to_rfc3339(),
            to.to_rfc3339()
        );

        let response: CandlesResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response
            .candles
            .into_iter()
            .map(|raw| Candle {
                symbol: symbol.to_string(),
                start_time: raw.start_time,
                end_time: raw.end_time,
                open: raw.open,
                high: raw.high,
                low: raw.low,
                close: raw.close,
                volume: raw.volume,
            })
            .collect())
    }

    async fn get_quote(&self, symbol: &str) -> Result<f64> {
        let url = format!("{}/quote?symbol={}", self.base_url, symbol);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::QuoteFetchFailed {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            })?;

        let quote: QuoteResponse =
            response.json().await.map_err(|e| Error::QuoteFetchFailed {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            })?;
        Ok(quote.price)
    }
}
