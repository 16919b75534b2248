// Adapted from `crate::indicators::bollinger` — price outside the bands
// signals a mean-reversion trade.

use serde_json::{json, Value};

use crate::indicators::bollinger::calculate_bollinger;
use crate::ta::indicator::{closes_f64, Indicator, IndicatorResult};

pub struct BollingerIndicator {
    period: usize,
    num_std: f64,
    ready: bool,
}

impl BollingerIndicator {
    pub fn from_params(params: &Value) -> Self {
        let period = params.get("period").and_then(Value::as_u64).unwrap_or(20) as usize;
        let num_std = params.get("num_std").and_then(Value::as_f64).unwrap_or(2.0);
        Self { period, num_std, ready: false }
    }
}

impl Indicator for BollingerIndicator {
    fn min_klines_required(&self) -> usize {
        self.period
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
        let Some(bb) = calculate_bollinger(&closes, self.period, self.num_std) else {
            return IndicatorResult::none(json!({"error": "insufficient data"}));
        };
        let Some(&close) = closes.last() else {
            return IndicatorResult::none(json!({"error": "no closes"}));
        };

        let signal = if close < bb.lower {
            "LONG"
        } else if close > bb.upper {
            "SHORT"
        } else {
            "NONE"
        };

        IndicatorResult {
            signal: signal.to_string(),
            data: json!({"upper": bb.upper, "middle": bb.middle, "lower": bb.lower, "width": bb.width}),
        }
    }
}
