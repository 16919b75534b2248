// Adapted from `crate::indicators::rsi` — mean-reversion signal: oversold
// (<=30) implies LONG, overbought (>=70) implies SHORT.

use serde_json::{json, Value};

use crate::indicators::rsi::current_rsi;
use crate::ta::indicator::{closes_f64, Indicator, IndicatorResult};

pub struct RsiIndicator {
    period: usize,
    ready: bool,
}

impl RsiIndicator {
    pub fn from_params(params: &Value) -> Self {
        let period = params.get("period").and_then(Value::as_u64).unwrap_or(14) as usize;
        Self { period, ready: false }
    }
}

impl Indicator for RsiIndicator {
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
        let Some(closes) = closes_f64(klines) else {
            return IndicatorResult::none(json!({"error": "decimal-to-f64 conversion failed"}));
        };
        let Some((value, label)) = current_rsi(&closes, self.period) else {
            return IndicatorResult::none(json!({"error": "insufficient data"}));
        };

        let signal = match label {
            "OVERSOLD" => "LONG",
            "OVERBOUGHT" => "SHORT",
            _ => "NONE",
        };

        IndicatorResult {
            signal: signal.to_string(),
            data: json!({"rsi": value, "label": label}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::de::kline::Kline;
    use rust_decimal_macros::dec;

    fn klines_with_closes(closes: &[i64]) -> Vec<Kline> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Kline {
                open: dec!(1),
                high: dec!(1),
                low: dec!(1),
                close: rust_decimal::Decimal::from(c),
                volume: dec!(1),
                timestamp: i as i64,
                is_closed: true,
            })
            .collect()
    }

    #[test]
    fn descending_series_is_oversold_and_emits_long() {
        let closes: Vec<i64> = (1..=30).rev().collect();
        let klines = klines_with_closes(&closes);
        let mut ind = RsiIndicator::from_params(&json!({}));
        ind.initialize(&klines);
        let result = ind.calculate(&klines);
        assert_eq!(result.signal, "LONG");
    }
}
