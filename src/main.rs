use chrono::{Duration, NaiveDate, Utc};
use clap::Parser;
use std::sync::Arc;

use trendblock::api::HttpMarketData;
use trendblock::store::{MemoryTradeStore, PostgresTradeStore, TradeStore};
use trendblock::stream::{EventBus, Session, SessionHandle};
use trendblock::{Result, Settings};

#[derive(Parser, Debug)]
#[command(name = "trendblock", about = "Intraday block-pattern breakout engine")]
struct Args {
    /// Instrument to monitor
    #[arg(short, long, default_value = "NIFTY")]
    symbol: String,

    /// Starting candle timeframe in minutes
    #[arg(short, long, default_value_t = 10)]
    timeframe: u32,

    /// Session date (exchange-local); defaults to today
    #[arg(short, long)]
    date: Option<NaiveDate>,

    /// Override the candle/quote HTTP service base URL
    #[arg(long)]
    data_url: Option<String>,

    /// Postgres connection string; falls back to DATABASE_URL, then memory
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trendblock=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut settings = Settings::load()?;
    if let Some(url) = args.data_url {
        settings.data_base_url = url;
    }
    if let Some(url) = args.database_url {
        settings.database_url = Some(url);
    }
    if settings.database_url.is_none() {
        settings.database_url = std::env::var("DATABASE_URL").ok();
    }

    let session_date = args.date.unwrap_or_else(|| {
        (Utc::now() + Duration::minutes(settings.utc_offset_minutes as i64)).date_naive()
    });

    tracing::info!(
        symbol = %args.symbol,
        timeframe = args.timeframe,
        date = %session_date,
        "Starting trendblock engine"
    );

    let market_data = Arc::new(HttpMarketData::new(settings.data_base_url.clone()));

    let store: Arc<dyn TradeStore> = match &settings.database_url {
        Some(url) => {
            tracing::info!("Using Postgres trade store");
            Arc::new(PostgresTradeStore::new(url).await?)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, trades will not survive restarts");
            Arc::new(MemoryTradeStore::new())
        }
    };

    let events = EventBus::default();
    let mut event_rx = events.subscribe();
    let session = Session::open(
        args.symbol,
        session_date,
        args.timeframe,
        settings,
        market_data,
        store,
        events,
    )
    .await?;
    let handle = SessionHandle::spawn(session);

    // Stream every engine event to the log as one JSON line
    let logger = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::info!(target: "trendblock::events", "{json}"),
                    Err(e) => tracing::error!(error = %e, "failed to serialize event"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(dropped = n, "event logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
            handle.stop().await;
        }
        _ = session_done(&handle) => {
            tracing::info!("Session finished");
        }
    }
    handle.join().await;
    logger.abort();

    Ok(())
}

/// Resolves once the session loop winds down on its own
async fn session_done(handle: &SessionHandle) {
    while !handle.is_finished() {
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    }
}
