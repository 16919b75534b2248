// Adapted from `crate::indicators::adx` — ADX measures trend *strength*
// without direction, so the signal combines it with the simple price
// direction over the same look-back window: a trending market (ADX above
// the threshold) signals in the direction the window moved; a non-trending
// one emits NONE.

use serde_json::{json, Value};

use crate::indicators::adx::calculate_adx;
use crate::ta::indicator::{to_candles, Indicator, IndicatorResult};

pub struct AdxIndicator {
    period: usize,
    trend_threshold: f64,
    ready: bool,
}

impl AdxIndicator {
    pub fn from_params(params: &Value) -> Self {
        let period = params.get("period").and_then(Value::as_u64).unwrap_or(14) as usize;
        let trend_threshold = params.get("trend_threshold").and_then(Value::as_f64).unwrap_or(25.0);
        Self { period, trend_threshold, ready: false }
    }
}

impl Indicator for AdxIndicator {
    fn min_klines_required(&self) -> usize {
        2 * self.period + 1
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn initialize(&mut self, history: &[crate::de::kline::Kline]) {
        let _ = self.calculate(history);
        self.ready = true;
    }

    fn calculate(&mut self, klines: &[crate::de::kline::Kline]) -> IndicatorResult {
        let Some(candles) = to_candles(klines) else {
            return IndicatorResult::none(json!({"error": "decimal-to-f64 conversion failed"}));
        };
        let Some(adx) = calculate_adx(&candles, self.period) else {
            return IndicatorResult::none(json!({"error": "insufficient data"}));
        };

        let signal = if adx < self.trend_threshold {
            "NONE"
        } else {
            match (candles.first(), candles.last()) {
                (Some(first), Some(last)) if last.close > first.close => "LONG",
                (Some(first), Some(last)) if last.close < first.close => "SHORT",
                _ => "NONE",
            }
        };

        IndicatorResult {
            signal: signal.to_string(),
            data: json!({"adx": adx}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::de::kline::Kline;
    use rust_decimal_macros::dec;

    fn klines_with_closes(closes: &[f64]) -> Vec<Kline> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Kline {
                open: dec!(1),
                high: rust_decimal::Decimal::try_from(c + 1.0).unwrap(),
                low: rust_decimal::Decimal::try_from(c - 1.0).unwrap(),
                close: rust_decimal::Decimal::try_from(c).unwrap(),
                volume: dec!(1),
                timestamp: i as i64,
                is_closed: true,
            })
            .collect()
    }

    #[test]
    fn strong_uptrend_emits_long() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 2.0).collect();
        let klines = klines_with_closes(&closes);
        let mut ind = AdxIndicator::from_params(&serde_json::json!({}));
        ind.initialize(&klines);
        let result = ind.calculate(&klines);
        assert_eq!(result.signal, "LONG");
    }
}
