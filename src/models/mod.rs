use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// OHLCV candle at any resolution (native 1-minute or an aggregated timeframe)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Fold a live price into an in-progress candle
    pub fn apply_price(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }
}

/// Named, ordered group of candles for one timeframe (C1 = candles 1-2,
/// C2 = candles 3-4), with its resampled OHLCV
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleBlock {
    pub name: String,
    pub timeframe_minutes: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub candles: Vec<Candle>,
}

/// Which side of a candle an extreme was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceType {
    High,
    Low,
}

/// How precisely an extreme timestamp was located
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtremeConfidence {
    /// Located from native 1-minute candles
    Exact,
    /// Minute data did not cover the span; fell back to the candle boundary
    BlockBoundary,
}

/// Minute-precision location of a price extreme inside one underlying candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExactTimestamp {
    /// 1-based index of the underlying candle (1..=4)
    pub candle_index: u8,
    pub price_type: PriceType,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub confidence: ExtremeConfidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrendType {
    Uptrend,
    Downtrend,
}

/// The four canonical Point A/B patterns; digits index the underlying candles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PatternName {
    OneThree,
    OneFour,
    TwoThree,
    TwoFour,
}

impl PatternName {
    pub const ALL: [PatternName; 4] = [
        PatternName::OneThree,
        PatternName::OneFour,
        PatternName::TwoThree,
        PatternName::TwoFour,
    ];

    /// 1-based index of the Point A candle
    pub fn a_index(self) -> u8 {
        match self {
            PatternName::OneThree | PatternName::OneFour => 1,
            PatternName::TwoThree | PatternName::TwoFour => 2,
        }
    }

    /// 1-based index of the Point B candle
    pub fn b_index(self) -> u8 {
        match self {
            PatternName::OneThree | PatternName::TwoThree => 3,
            PatternName::OneFour | PatternName::TwoFour => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PatternName::OneThree => "1-3",
            PatternName::OneFour => "1-4",
            PatternName::TwoThree => "2-3",
            PatternName::TwoFour => "2-4",
        }
    }
}

/// Dominant trend line between two blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlopeResult {
    pub point_a: ExactTimestamp,
    pub point_b: ExactTimestamp,
    /// Points per minute; sign matches the trend direction
    pub slope: f64,
    pub trend: TrendType,
    pub pattern: PatternName,
}

/// Price threshold whose crossing, subject to timing rules, authorizes a trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakoutLevel {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    /// 1-based index of the candle the reference price came from
    pub source_candle: u8,
}

/// Idempotency record for a candle progression (e.g. 4th -> 5th)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionTrigger {
    pub from_candle: u8,
    pub to_candle: u8,
    pub fired_at: DateTime<Utc>,
}

/// Identifies one pattern occurrence for early-breakout invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternKey {
    pub symbol: String,
    pub date: NaiveDate,
    pub timeframe_minutes: u32,
    pub trend: TrendType,
    pub pattern: PatternName,
}

/// One-shot record: the breakout level was crossed before the timing rules
/// first held, blocking authorization for 15 minutes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationRecord {
    pub pattern_key: PatternKey,
    pub broke_early_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Closed,
}

/// Which exit rule closed a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    FastTrend,
    Target,
    CandleClose,
    StopLoss,
    TrailingStop,
    Manual,
}

impl ExitReason {
    pub fn label(self) -> &'static str {
        match self {
            ExitReason::FastTrend => "A-Fast Trend",
            ExitReason::Target => "B-80% Target",
            ExitReason::CandleClose => "C-Candle Close",
            ExitReason::StopLoss => "D-Stop Loss",
            ExitReason::TrailingStop => "F-Trailing Stop",
            ExitReason::Manual => "Manual",
        }
    }
}

/// A live trade tracked tick-by-tick by the exit scenario engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub symbol: String,
    pub side: TradeSide,
    pub entry_price: f64,
    pub quantity: f64,
    /// Direction-dependent stop price level
    pub stop_loss: f64,
    /// Target P&L in points (per unit)
    pub target_pl: f64,
    pub entry_time: DateTime<Utc>,
    pub status: TradeStatus,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub exit_time: Option<DateTime<Utc>>,
}

impl Trade {
    pub fn new(
        symbol: String,
        side: TradeSide,
        entry_price: f64,
        quantity: f64,
        stop_loss: f64,
        target_pl: f64,
        entry_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol,
            side,
            entry_price,
            quantity,
            stop_loss,
            target_pl,
            entry_time,
            status: TradeStatus::Open,
            exit_price: None,
            exit_reason: None,
            exit_time: None,
        }
    }

    /// Unrealized P&L in points (per unit), signed by side
    pub fn pnl_points(&self, current_price: f64) -> f64 {
        match self.side {
            TradeSide::Buy => current_price - self.entry_price,
            TradeSide::Sell => self.entry_price - current_price,
        }
    }

    /// Unrealized monetary P&L: points * quantity
    pub fn pnl(&self, current_price: f64) -> f64 {
        self.pnl_points(current_price) * self.quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_pattern_indices() {
        assert_eq!(PatternName::OneThree.a_index(), 1);
        assert_eq!(PatternName::OneThree.b_index(), 3);
        assert_eq!(PatternName::TwoFour.a_index(), 2);
        assert_eq!(PatternName::TwoFour.b_index(), 4);
        assert_eq!(PatternName::TwoThree.label(), "2-3");
    }

    #[test]
    fn test_pattern_tie_break_order() {
        // Lowest pattern index wins slope ties
        let mut sorted = PatternName::ALL;
        sorted.sort();
        assert_eq!(sorted, PatternName::ALL);
    }

    #[test]
    fn test_pnl_sign_convention() {
        let entry = Utc.with_ymd_and_hms(2025, 7, 14, 4, 0, 0).unwrap();
        let long = Trade::new(
            "NIFTY".into(),
            TradeSide::Buy,
            24900.0,
            2.0,
            24880.0,
            50.0,
            entry,
        );
        assert_eq!(long.pnl_points(24940.0), 40.0);
        assert_eq!(long.pnl(24940.0), 80.0);

        let short = Trade::new(
            "NIFTY".into(),
            TradeSide::Sell,
            24900.0,
            2.0,
            24920.0,
            50.0,
            entry,
        );
        assert_eq!(short.pnl_points(24940.0), -40.0);
        assert_eq!(short.pnl(24860.0), 80.0);
    }

    #[test]
    fn test_candle_apply_price() {
        let start = Utc.with_ymd_and_hms(2025, 7, 14, 4, 0, 0).unwrap();
        let mut candle = Candle {
            symbol: "NIFTY".into(),
            start_time: start,
            end_time: start + chrono::Duration::minutes(10),
            open: 100.0,
            high: 100.0,
            low: 100.0,
            close: 100.0,
            volume: 0.0,
        };
        candle.apply_price(103.0);
        candle.apply_price(99.0);
        assert_eq!(candle.high, 103.0);
        assert_eq!(candle.low, 99.0);
        assert_eq!(candle.close, 99.0);
    }

    #[test]
    fn test_exit_reason_labels() {
        assert_eq!(ExitReason::Target.label(), "B-80% Target");
        assert_eq!(ExitReason::FastTrend.label(), "A-Fast Trend");
    }
}
