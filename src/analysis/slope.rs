use crate::blocks::{minutes_in_span, underlying_candles};
use crate::models::{
    Candle, CandleBlock, ExactTimestamp, ExtremeConfidence, PatternName, PriceType, SlopeResult,
};
use crate::{Error, Result};

/// Dominant trend line per direction, if one exists
#[derive(Debug, Clone, Default)]
pub struct SlopeAnalysis {
    pub uptrend: Option<SlopeResult>,
    pub downtrend: Option<SlopeResult>,
}

impl SlopeAnalysis {
    pub fn for_trend(&self, trend: crate::models::TrendType) -> Option<&SlopeResult> {
        match trend {
            crate::models::TrendType::Uptrend => self.uptrend.as_ref(),
            crate::models::TrendType::Downtrend => self.downtrend.as_ref(),
        }
    }
}

/// Locate Point A/B extremes for the four canonical patterns and pick the
/// dominant slope per trend direction.
///
/// An uptrend line runs from a low in block C1 to a high in block C2; a
/// downtrend from a high to a low. Candidates whose slope sign does not match
/// the direction are discarded. The larger |slope| wins; ties break toward
/// the lowest pattern index.
pub fn detect_slopes(blocks: &[CandleBlock], minute_candles: &[Candle]) -> Result<SlopeAnalysis> {
    let candles = underlying_candles(blocks);
    if candles.is_empty() {
        return Err(Error::NoExtremeFound { candle_index: 1 });
    }

    let mut analysis = SlopeAnalysis::default();
    for pattern in PatternName::ALL {
        let a_idx = pattern.a_index() as usize;
        let b_idx = pattern.b_index() as usize;
        let (Some(candle_a), Some(candle_b)) = (candles.get(a_idx - 1), candles.get(b_idx - 1))
        else {
            continue;
        };

        // Uptrend: low -> high
        let a = locate_extreme(candle_a, pattern.a_index(), PriceType::Low, minute_candles);
        let b = locate_extreme(candle_b, pattern.b_index(), PriceType::High, minute_candles);
        consider(
            &mut analysis.uptrend,
            candidate(a, b, crate::models::TrendType::Uptrend, pattern),
        );

        // Downtrend: high -> low
        let a = locate_extreme(candle_a, pattern.a_index(), PriceType::High, minute_candles);
        let b = locate_extreme(candle_b, pattern.b_index(), PriceType::Low, minute_candles);
        consider(
            &mut analysis.downtrend,
            candidate(a, b, crate::models::TrendType::Downtrend, pattern),
        );
    }
    Ok(analysis)
}

/// Minute-precise extreme inside one underlying candle. Falls back to the
/// candle's own OHLC extreme at its start boundary when the minute data does
/// not cover the span.
pub fn locate_extreme(
    candle: &Candle,
    candle_index: u8,
    price_type: PriceType,
    minute_candles: &[Candle],
) -> ExactTimestamp {
    let mut best: Option<(f64, chrono::DateTime<chrono::Utc>)> = None;
    for minute in minutes_in_span(minute_candles, candle.start_time, candle.end_time) {
        let price = match price_type {
            PriceType::High => minute.high,
            PriceType::Low => minute.low,
        };
        let better = match (price_type, best) {
            (_, None) => true,
            (PriceType::High, Some((p, _))) => price > p,
            (PriceType::Low, Some((p, _))) => price < p,
        };
        if better {
            best = Some((price, minute.start_time));
        }
    }

    match best {
        Some((price, timestamp)) => ExactTimestamp {
            candle_index,
            price_type,
            price,
            timestamp,
            confidence: ExtremeConfidence::Exact,
        },
        None => ExactTimestamp {
            candle_index,
            price_type,
            price: match price_type {
                PriceType::High => candle.high,
                PriceType::Low => candle.low,
            },
            timestamp: candle.start_time,
            confidence: ExtremeConfidence::BlockBoundary,
        },
    }
}

fn candidate(
    point_a: ExactTimestamp,
    point_b: ExactTimestamp,
    trend: crate::models::TrendType,
    pattern: PatternName,
) -> Option<SlopeResult> {
    let minutes = (point_b.timestamp - point_a.timestamp).num_seconds() as f64 / 60.0;
    if minutes <= 0.0 {
        return None;
    }
    let slope = (point_b.price - point_a.price) / minutes;
    let sign_matches = match trend {
        crate::models::TrendType::Uptrend => slope > 0.0,
        crate::models::TrendType::Downtrend => slope < 0.0,
    };
    if !sign_matches {
        return None;
    }
    Some(SlopeResult {
        point_a,
        point_b,
        slope,
        trend,
        pattern,
    })
}

fn consider(slot: &mut Option<SlopeResult>, candidate: Option<SlopeResult>) {
    let Some(candidate) = candidate else { return };
    // Patterns are visited in index order, so strictly-greater keeps the
    // lowest pattern index on a tie.
    let replace = match slot {
        None => true,
        Some(current) => candidate.slope.abs() > current.slope.abs(),
    };
    if replace {
        *slot = Some(candidate);
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::blocks::{BlockLayout, build_blocks};
    use crate::models::TrendType;
    use chrono::{Duration, TimeZone, Utc};

    /// 40 one-minute candles from 09:15 reproducing the reference NIFTY day:
    /// C1 high 24994.85@09:15, C1 low 24907.6@09:22, C2 high 24978.75@09:38,
    /// C2 low 24912.7@09:49.
    pub fn scenario_minutes() -> Vec<Candle> {
        let open = Utc.with_ymd_and_hms(2025, 7, 14, 9, 15, 0).unwrap();
        let mut candles: Vec<Candle> = (0..40)
            .map(|i| {
                let start = open + Duration::minutes(i);
                Candle {
                    symbol: "NIFTY".into(),
                    start_time: start,
                    end_time: start + Duration::minutes(1),
                    open: 24950.0,
                    high: 24951.0,
                    low: 24949.0,
                    close: 24950.0,
                    volume: 1000.0,
                }
            })
            .collect();
        candles[0].high = 24994.85; // 09:15
        candles[7].low = 24907.6; // 09:22
        candles[11].low = 24940.0; // 09:26, candle 2 low
        candles[23].high = 24978.75; // 09:38
        candles[25].low = 24945.0; // 09:40, candle 3 low
        candles[34].low = 24912.7; // 09:49
        candles
    }

    fn scenario_blocks() -> (Vec<CandleBlock>, Vec<Candle>) {
        let minutes = scenario_minutes();
        let blocks = build_blocks(&minutes, 10, BlockLayout::default()).unwrap();
        (blocks, minutes)
    }

    #[test]
    fn test_uptrend_dominant_pattern_is_1_3() {
        let (blocks, minutes) = scenario_blocks();
        let analysis = detect_slopes(&blocks, &minutes).unwrap();

        let up = analysis.uptrend.expect("uptrend expected");
        assert_eq!(up.pattern, PatternName::OneThree);
        assert_eq!(up.point_a.price, 24907.6);
        assert_eq!(up.point_b.price, 24978.75);
        assert_eq!(up.point_a.timestamp.format("%H:%M").to_string(), "09:22");
        assert_eq!(up.point_b.timestamp.format("%H:%M").to_string(), "09:38");
        // (24978.75 - 24907.6) / 16 minutes
        assert!((up.slope - 4.446875).abs() < 1e-9);
    }

    #[test]
    fn test_slope_sign_matches_trend() {
        let (blocks, minutes) = scenario_blocks();
        let analysis = detect_slopes(&blocks, &minutes).unwrap();

        if let Some(up) = &analysis.uptrend {
            assert!(up.slope > 0.0);
            assert_eq!(up.trend, TrendType::Uptrend);
        }
        if let Some(down) = &analysis.downtrend {
            assert!(down.slope < 0.0);
            assert_eq!(down.trend, TrendType::Downtrend);
        }
    }

    #[test]
    fn test_point_a_before_point_b() {
        let (blocks, minutes) = scenario_blocks();
        let analysis = detect_slopes(&blocks, &minutes).unwrap();

        for result in [analysis.uptrend, analysis.downtrend].into_iter().flatten() {
            assert!(result.point_a.timestamp < result.point_b.timestamp);
        }
    }

    #[test]
    fn test_missing_minute_data_degrades_to_block_boundary() {
        let (blocks, _) = scenario_blocks();
        let analysis = detect_slopes(&blocks, &[]).unwrap();

        let up = analysis.uptrend.expect("uptrend expected");
        assert_eq!(up.point_a.confidence, ExtremeConfidence::BlockBoundary);
        assert_eq!(up.point_b.confidence, ExtremeConfidence::BlockBoundary);
        // Boundary timestamps are the underlying candle starts
        assert!(up.point_a.timestamp < up.point_b.timestamp);
    }

    #[test]
    fn test_empty_blocks_is_no_extreme_found() {
        let err = detect_slopes(&[], &[]).unwrap_err();
        assert!(matches!(err, Error::NoExtremeFound { .. }));
    }

    #[test]
    fn test_exact_extreme_location() {
        let minutes = scenario_minutes();
        let (blocks, _) = scenario_blocks();
        let candle_1 = &blocks[0].candles[0];

        let low = locate_extreme(candle_1, 1, PriceType::Low, &minutes);
        assert_eq!(low.price, 24907.6);
        assert_eq!(low.confidence, ExtremeConfidence::Exact);
        assert_eq!(low.timestamp.format("%H:%M").to_string(), "09:22");

        let high = locate_extreme(candle_1, 1, PriceType::High, &minutes);
        assert_eq!(high.price, 24994.85);
        assert_eq!(high.timestamp.format("%H:%M").to_string(), "09:15");
    }
}
