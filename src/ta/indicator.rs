// =============================================================================
// Indicator — the contract every technical indicator implements
// =============================================================================
//
// The math underneath each indicator is the teacher's pure `indicators::*`
// module, untouched. This trait is the adapter layer the teacher never
// needed (it ran every indicator as a bare function call from the regime
// detector); here each indicator is a long-lived, stateful instance keyed
// by `(user_id, symbol, interval, indicator_name)` that must track its own
// readiness across repeated `calculate` calls on a growing kline window.
// =============================================================================

use std::collections::HashMap;

use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;

use crate::de::kline::Kline;

/// Output of one `calculate` call: a directional signal plus indicator-
/// specific data for downstream consumers (strategies, the dashboard).
#[derive(Debug, Clone)]
pub struct IndicatorResult {
    pub signal: String,
    pub data: Value,
}

impl IndicatorResult {
    pub fn none(data: Value) -> Self {
        Self { signal: "NONE".to_string(), data }
    }
}

/// A single technical indicator instance, bound to one `(user_id, symbol,
/// interval)` stream.
pub trait Indicator: Send + Sync {
    /// Minimum number of historical klines needed before this indicator can
    /// be initialised. Defaults to 200 per the teacher's own `BaseIndicator`
    /// convention, overridden per concrete indicator as needed.
    fn min_klines_required(&self) -> usize {
        200
    }

    fn is_ready(&self) -> bool;

    /// Called exactly once with the historical klines DE fetched on
    /// subscription; must invoke `calculate` internally and flip readiness.
    fn initialize(&mut self, history: &[Kline]);

    /// Called on every subsequent kline tick. Stateless in principle (full
    /// `klines` window passed each time) but implementations may cache
    /// derived series for efficiency.
    fn calculate(&mut self, klines: &[Kline]) -> IndicatorResult;
}

/// `None` if any close in `klines` cannot be represented as `f64` — callers
/// must treat this the same as "insufficient data" rather than silently
/// computing over a zeroed-out close.
pub fn closes_f64(klines: &[Kline]) -> Option<Vec<f64>> {
    klines.iter().map(|k| k.close.to_f64()).collect()
}

/// `None` if any OHLCV field in `klines` cannot be represented as `f64`.
pub fn to_candles(klines: &[Kline]) -> Option<Vec<crate::market_data::Candle>> {
    klines
        .iter()
        .map(|k| {
            Some(crate::market_data::Candle {
                open_time: k.timestamp,
                close_time: k.timestamp,
                open: k.open.to_f64()?,
                high: k.high.to_f64()?,
                low: k.low.to_f64()?,
                close: k.close.to_f64()?,
                volume: k.volume.to_f64()?,
                quote_volume: 0.0,
                trades_count: 0,
                taker_buy_volume: 0.0,
                taker_buy_quote_volume: 0.0,
                is_closed: k.is_closed,
            })
        })
        .collect()
}

pub type IndicatorConstructor = fn(&Value) -> Box<dyn Indicator>;

/// Name -> constructor lookup, populated once at startup with both the
/// teacher's ported indicator set and the new MA-stop reference indicator.
pub fn registry() -> HashMap<&'static str, IndicatorConstructor> {
    let mut map: HashMap<&'static str, IndicatorConstructor> = HashMap::new();
    map.insert("ema", |params| Box::new(super::indicators::ema::EmaIndicator::from_params(params)));
    map.insert("rsi", |params| Box::new(super::indicators::rsi::RsiIndicator::from_params(params)));
    map.insert("adx", |params| Box::new(super::indicators::adx::AdxIndicator::from_params(params)));
    map.insert(
        "bollinger",
        |params| Box::new(super::indicators::bollinger::BollingerIndicator::from_params(params)),
    );
    map.insert("atr", |params| Box::new(super::indicators::atr::AtrIndicator::from_params(params)));
    map.insert("roc", |params| Box::new(super::indicators::roc::RocIndicator::from_params(params)));
    map.insert("ma_stop", |params| Box::new(super::indicators::ma_stop::MaStopIndicator::from_params(params)));
    map
}
