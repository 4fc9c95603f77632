use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;

use crate::Result;

/// Engine settings
///
/// Defaults match the NSE intraday session (09:15 open, 15:25 late-exit
/// cutoff, IST). Every field can be overridden through `TRENDBLOCK_*`
/// environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Market open, local exchange wall-clock
    pub market_open: NaiveTime,
    /// Rule C hard cutoff, local exchange wall-clock
    pub late_exit_cutoff: NaiveTime,
    /// Exchange offset from UTC in minutes (IST = 330)
    pub utc_offset_minutes: i32,
    /// Rule A threshold, points
    pub fast_trend_points: f64,
    /// Rule B fraction of target P&L
    pub target_fraction: f64,
    /// Rule E fraction of target P&L that moves the stop to breakeven
    pub risk_free_fraction: f64,
    /// Rule F trailing distance, points
    pub trailing_points: f64,
    /// Rule C candle-elapsed fraction
    pub candle_elapsed_exit: f64,
    /// Early-breakout invalidation window, minutes
    pub invalidation_minutes: i64,
    /// Timeframe doubling stops once the doubled value exceeds this
    pub max_timeframe_minutes: u32,
    /// Tick interval while watching the 6th candle, ms
    pub sixth_candle_tick_ms: u64,
    /// Tick interval for generic breakout monitoring, ms
    pub default_tick_ms: u64,
    /// Base URL of the candle/quote HTTP service
    pub data_base_url: String,
    pub database_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            market_open: NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
            late_exit_cutoff: NaiveTime::from_hms_opt(15, 25, 0).unwrap(),
            utc_offset_minutes: 330,
            fast_trend_points: 20.0,
            target_fraction: 0.8,
            risk_free_fraction: 0.5,
            trailing_points: 10.0,
            candle_elapsed_exit: 0.95,
            invalidation_minutes: 15,
            max_timeframe_minutes: 80,
            sixth_candle_tick_ms: 700,
            default_tick_ms: 500,
            data_base_url: "http://127.0.0.1:8090".to_string(),
            database_url: None,
        }
    }
}

impl Settings {
    /// Layered load: built-in defaults overridden by `TRENDBLOCK_*` env vars
    pub fn load() -> Result<Self> {
        let defaults = Settings::default();
        let cfg = config::Config::builder()
            .set_default("market_open", defaults.market_open.format("%H:%M:%S").to_string())?
            .set_default(
                "late_exit_cutoff",
                defaults.late_exit_cutoff.format("%H:%M:%S").to_string(),
            )?
            .set_default("utc_offset_minutes", defaults.utc_offset_minutes as i64)?
            .set_default("fast_trend_points", defaults.fast_trend_points)?
            .set_default("target_fraction", defaults.target_fraction)?
            .set_default("risk_free_fraction", defaults.risk_free_fraction)?
            .set_default("trailing_points", defaults.trailing_points)?
            .set_default("candle_elapsed_exit", defaults.candle_elapsed_exit)?
            .set_default("invalidation_minutes", defaults.invalidation_minutes)?
            .set_default("max_timeframe_minutes", defaults.max_timeframe_minutes as i64)?
            .set_default("sixth_candle_tick_ms", defaults.sixth_candle_tick_ms as i64)?
            .set_default("default_tick_ms", defaults.default_tick_ms as i64)?
            .set_default("data_base_url", defaults.data_base_url)?
            .add_source(config::Environment::with_prefix("TRENDBLOCK"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    /// Market open for a session date, in UTC
    pub fn market_open_utc(&self, date: NaiveDate) -> DateTime<Utc> {
        let local = date.and_time(self.market_open);
        DateTime::from_naive_utc_and_offset(
            local - Duration::minutes(self.utc_offset_minutes as i64),
            Utc,
        )
    }

    /// Exchange-local wall-clock time for a UTC instant
    pub fn local_time(&self, now: DateTime<Utc>) -> NaiveTime {
        (now + Duration::minutes(self.utc_offset_minutes as i64))
            .naive_utc()
            .time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.fast_trend_points, 20.0);
        assert_eq!(settings.invalidation_minutes, 15);
        assert_eq!(settings.max_timeframe_minutes, 80);
    }

    #[test]
    fn test_market_open_utc_for_ist() {
        let settings = Settings::default();
        let date = NaiveDate::from_ymd_opt(2025, 7, 14).unwrap();
        // 09:15 IST == 03:45 UTC
        let open = settings.market_open_utc(date);
        assert_eq!(open.format("%H:%M").to_string(), "03:45");
    }

    #[test]
    fn test_local_time_roundtrip() {
        let settings = Settings::default();
        let date = NaiveDate::from_ymd_opt(2025, 7, 14).unwrap();
        let open = settings.market_open_utc(date);
        assert_eq!(settings.local_time(open), settings.market_open);
    }

    #[test]
    fn test_load_uses_defaults_without_env() {
        let settings = Settings::load().unwrap();
        assert_eq!(settings.sixth_candle_tick_ms, 700);
        assert_eq!(settings.default_tick_ms, 500);
        assert_eq!(settings.market_open, NaiveTime::from_hms_opt(9, 15, 0).unwrap());
    }
}
