use chrono::{DateTime, Duration, Utc};

use crate::models::{Candle, CandleBlock};
use crate::{Error, Result};

/// Shape of the block decomposition. The canonical pattern uses two blocks of
/// two timeframe candles each (C1 = candles 1-2, C2 = candles 3-4).
#[derive(Debug, Clone, Copy)]
pub struct BlockLayout {
    pub blocks: usize,
    pub candles_per_block: usize,
}

impl Default for BlockLayout {
    fn default() -> Self {
        Self {
            blocks: 2,
            candles_per_block: 2,
        }
    }
}

impl BlockLayout {
    pub fn total_candles(&self) -> usize {
        self.blocks * self.candles_per_block
    }
}

/// Resample ordered native minute candles into fixed-size blocks for one
/// timeframe. Pure function; returns `DataIncomplete` when the input does not
/// cover the full span yet so the caller can retry on a later tick.
pub fn build_blocks(
    minute_candles: &[Candle],
    timeframe_minutes: u32,
    layout: BlockLayout,
) -> Result<Vec<CandleBlock>> {
    let needed = layout.total_candles() * timeframe_minutes as usize;
    if minute_candles.len() < needed {
        return Err(Error::DataIncomplete {
            needed,
            got: minute_candles.len(),
        });
    }

    let anchor = minute_candles[0].start_time;
    let timeframe = Duration::minutes(timeframe_minutes as i64);

    let mut blocks = Vec::with_capacity(layout.blocks);
    for block_idx in 0..layout.blocks {
        let mut candles = Vec::with_capacity(layout.candles_per_block);
        for slot in 0..layout.candles_per_block {
            let index = block_idx * layout.candles_per_block + slot;
            let start = anchor + timeframe * index as i32;
            let end = start + timeframe;
            candles.push(aggregate_window(minute_candles, start, end)?);
        }
        blocks.push(assemble_block(
            format!("C{}", block_idx + 1),
            timeframe_minutes,
            candles,
        ));
    }
    Ok(blocks)
}

/// Minute candles falling inside one timeframe candle's span
pub fn minutes_in_span<'a>(
    minute_candles: &'a [Candle],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> impl Iterator<Item = &'a Candle> {
    minute_candles
        .iter()
        .filter(move |c| c.start_time >= start && c.start_time < end)
}

/// All underlying candles across the blocks, in pattern index order (1..=4)
pub fn underlying_candles(blocks: &[CandleBlock]) -> Vec<&Candle> {
    blocks.iter().flat_map(|b| b.candles.iter()).collect()
}

fn aggregate_window(
    minute_candles: &[Candle],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Candle> {
    let window: Vec<&Candle> = minutes_in_span(minute_candles, start, end).collect();
    let (first, last) = match (window.first(), window.last()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => {
            return Err(Error::DataIncomplete {
                needed: 1,
                got: 0,
            })
        }
    };

    Ok(Candle {
        symbol: first.symbol.clone(),
        start_time: start,
        end_time: end,
        open: first.open,
        high: window.iter().map(|c| c.high).fold(f64::MIN, f64::max),
        low: window.iter().map(|c| c.low).fold(f64::MAX, f64::min),
        close: last.close,
        volume: window.iter().map(|c| c.volume).sum(),
    })
}

fn assemble_block(name: String, timeframe_minutes: u32, candles: Vec<Candle>) -> CandleBlock {
    let first = &candles[0];
    let last = &candles[candles.len() - 1];
    CandleBlock {
        name,
        timeframe_minutes,
        start_time: first.start_time,
        end_time: last.end_time,
        open: first.open,
        high: candles.iter().map(|c| c.high).fold(f64::MIN, f64::max),
        low: candles.iter().map(|c| c.low).fold(f64::MAX, f64::min),
        close: last.close,
        volume: candles.iter().map(|c| c.volume).sum(),
        candles,
    }
}
