//! Six trade-exit rules evaluated in fixed priority order each tick.
//!
//! The first closing rule wins and stops further evaluation for that trade.
//! Rule E is the exception: it never closes, it moves the stop to breakeven
//! and evaluation continues to Rule F.

use chrono::{DateTime, NaiveTime, Utc};

use crate::config::Settings;
use crate::models::{ExitReason, Trade, TradeSide};

/// Per-tick market context shared by all open trades
#[derive(Debug, Clone, Copy)]
pub struct TickContext {
    pub price: f64,
    pub now: DateTime<Utc>,
    /// Span of the monitored in-progress candle
    pub candle_start: DateTime<Utc>,
    pub candle_end: DateTime<Utc>,
    /// Exchange-local wall clock for the late-session cutoff
    pub local_time: NaiveTime,
}

impl TickContext {
    /// Fraction of the monitored candle that has elapsed, clamped to [0, 1]
    pub fn candle_elapsed(&self) -> f64 {
        let total = (self.candle_end - self.candle_start).num_seconds() as f64;
        if total <= 0.0 {
            return 1.0;
        }
        let elapsed = (self.now - self.candle_start).num_seconds() as f64;
        (elapsed / total).clamp(0.0, 1.0)
    }
}

/// What one evaluation pass decided for a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuleOutcome {
    pub close: Option<ExitReason>,
    /// Rule E: stop loss should move to the entry price
    pub move_stop_to_entry: bool,
}

/// Evaluate rules A-F for one open trade.
///
/// `best_points` is the most favorable P&L (points) seen since entry,
/// maintained by the trade book for the trailing stop.
pub fn evaluate_exit_rules(
    trade: &Trade,
    best_points: f64,
    ctx: &TickContext,
    settings: &Settings,
) -> RuleOutcome {
    let points = trade.pnl_points(ctx.price);

    // A. Fast-trend: the move ran away in either direction
    if points.abs() > settings.fast_trend_points {
        return RuleOutcome {
            close: Some(ExitReason::FastTrend),
            move_stop_to_entry: false,
        };
    }

    // B. Target: 80% of the projected P&L is enough
    if points >= settings.target_fraction * trade.target_pl {
        return RuleOutcome {
            close: Some(ExitReason::Target),
            move_stop_to_entry: false,
        };
    }

    // C. Close/duration protection
    if ctx.candle_elapsed() >= settings.candle_elapsed_exit
        || ctx.local_time >= settings.late_exit_cutoff
    {
        return RuleOutcome {
            close: Some(ExitReason::CandleClose),
            move_stop_to_entry: false,
        };
    }

    // D. Stop-loss level breach
    let stop_hit = match trade.side {
        TradeSide::Buy => ctx.price <= trade.stop_loss,
        TradeSide::Sell => ctx.price >= trade.stop_loss,
    };
    if stop_hit {
        return RuleOutcome {
            close: Some(ExitReason::StopLoss),
            move_stop_to_entry: false,
        };
    }

    // E. Risk-free (non-closing): at half the target, stop moves to entry
    let mut outcome = RuleOutcome::default();
    if points >= settings.risk_free_fraction * trade.target_pl && trade.stop_loss != trade.entry_price
    {
        outcome.move_stop_to_entry = true;
    }

    // F. Duration trailing stop, active after half the candle
    if ctx.candle_elapsed() >= 0.5 && best_points - points >= settings.trailing_points {
        outcome.close = Some(ExitReason::TrailingStop);
    }

    outcome
}
