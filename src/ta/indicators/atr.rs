// Adapted from `crate::indicators::atr` — a pure volatility read with no
// directional opinion; always emits NONE, carrying the ATR value/percentage
// for strategies and the dashboard to use as a risk input.

use serde_json::{json, Value};

use crate::indicators::atr::{calculate_atr, calculate_atr_pct};
use crate::ta::indicator::{to_candles, Indicator, IndicatorResult};

pub struct AtrIndicator {
    period: usize,
    ready: bool,
}

impl AtrIndicator {
    pub fn from_params(params: &Value) -> Self {
        let period = params.get("period").and_then(Value::as_u64).unwrap_or(14) as usize;
        Self { period, ready: false }
    }
}

impl Indicator for AtrIndicator {
    fn min_klines_required(&self) -> usize {
        self.period + 1
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
        let Some(atr) = calculate_atr(&candles, self.period) else {
            return IndicatorResult::none(json!({"error": "insufficient data"}));
        };
        let atr_pct = calculate_atr_pct(&candles, self.period).unwrap_or(0.0);

        IndicatorResult::none(json!({"atr": atr, "atr_pct": atr_pct}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::de::kline::Kline;
    use rust_decimal_macros::dec;

    fn klines_with_range(n: usize) -> Vec<Kline> {
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.1;
                Kline {
                    open: dec!(1),
                    high: rust_decimal::Decimal::try_from(base + 5.0).unwrap(),
                    low: rust_decimal::Decimal::try_from(base - 5.0).unwrap(),
                    close: rust_decimal::Decimal::try_from(base).unwrap(),
                    volume: dec!(1),
                    timestamp: i as i64,
                    is_closed: true,
                }
            })
            .collect()
    }

    #[test]
    fn emits_none_signal_with_atr_data() {
        let klines = klines_with_range(30);
        let mut ind = AtrIndicator::from_params(&serde_json::json!({}));
        ind.initialize(&klines);
        let result = ind.calculate(&klines);
        assert_eq!(result.signal, "NONE");
        assert!(result.data.get("atr").is_some());
    }
}
