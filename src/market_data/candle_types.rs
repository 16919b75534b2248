// =============================================================================
// Candle / CandleKey — OHLCV types shared with the retained indicator math
// =============================================================================
//
// Carried from the teacher's `market_data::candle_buffer`: DE's own
// `MarketStream` now owns the live kline WebSocket and publishes
// `de.kline.update` directly rather than populating a shared ring buffer,
// so only the plain data types survive here — `CandleBuffer` and
// `run_kline_stream` had no remaining caller and were dropped.
// =============================================================================

use serde::{Deserialize, Serialize};

/// A single OHLCV candle, as consumed by the retained ADX/ATR indicator math.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trades_count: u64,
    pub taker_buy_volume: f64,
    pub taker_buy_quote_volume: f64,
    pub is_closed: bool,
}

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: String,
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}
