use thiserror::Error;

/// Engine-wide error type
///
/// Nothing here is fatal to the process: every variant degrades the current
/// tick or transition and the session keeps running.
#[derive(Debug, Error)]
pub enum Error {
    /// Not enough native-resolution candles to assemble the requested blocks.
    /// Caller retries on a later tick.
    #[error("incomplete candle data: needed {needed} candles, got {got}")]
    DataIncomplete { needed: usize, got: usize },

    /// No price extreme could be located for a candle span.
    #[error("no price extreme found for candle {candle_index}")]
    NoExtremeFound { candle_index: u8 },

    /// Live quote lookup failed and no historical fallback was available.
    #[error("quote fetch failed for {symbol}: {reason}")]
    QuoteFetchFailed { symbol: String, reason: String },

    /// Trade store write failed; in-memory state still advances.
    #[error("storage write failed: {0}")]
    StorageWriteFailed(String),

    #[error("market data request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
