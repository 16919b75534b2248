// Adapted from `crate::indicators::roc` — positive momentum is LONG,
// negative is SHORT.

use serde_json::{json, Value};

use crate::indicators::roc::current_roc;
use crate::ta::indicator::{closes_f64, Indicator, IndicatorResult};

pub struct RocIndicator {
    period: usize,
    ready: bool,
}

impl RocIndicator {
    pub fn from_params(params: &Value) -> Self {
        let period = params.get("period").and_then(Value::as_u64).unwrap_or(14) as usize;
        Self { period, ready: false }
    }
}

impl Indicator for RocIndicator {
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
        let Some(roc) = current_roc(&closes, self.period) else {
            return IndicatorResult::none(json!({"error": "insufficient data"}));
        };

        let signal = if roc > 0.0 { "LONG" } else if roc < 0.0 { "SHORT" } else { "NONE" };

        IndicatorResult {
            signal: signal.to_string(),
            data: json!({"roc": roc}),
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
    fn rising_series_emits_long() {
        let closes: Vec<i64> = (1..=20).collect();
        let klines = klines_with_closes(&closes);
        let mut ind = RocIndicator::from_params(&serde_json::json!({}));
        ind.initialize(&klines);
        let result = ind.calculate(&klines);
        assert_eq!(result.signal, "LONG");
    }
}
