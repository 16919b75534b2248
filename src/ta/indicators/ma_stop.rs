// =============================================================================
// MA-Stop — moving-average trailing-stop indicator
// =============================================================================
//
// New; the teacher has nothing like it. A simple-average stop band: long
// positions are valid above `ma * (1 - percent/100)`, shorts above
// `ma * (1 + percent/100)`.
// =============================================================================

use serde_json::{json, Value};

use crate::ta::indicator::{closes_f64, Indicator, IndicatorResult};

pub struct MaStopIndicator {
    period: usize,
    percent: f64,
    ready: bool,
}

impl MaStopIndicator {
    pub fn from_params(params: &Value) -> Self {
        let period = params.get("period").and_then(Value::as_u64).unwrap_or(20) as usize;
        let percent = params.get("percent").and_then(Value::as_f64).unwrap_or(2.0);
        Self { period, percent, ready: false }
    }
}

impl Indicator for MaStopIndicator {
    fn min_klines_required(&self) -> usize {
        (self.period * 2).max(50)
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
        if closes.len() < self.period {
            return IndicatorResult::none(json!({"error": "insufficient data"}));
        }

        let window = &closes[closes.len() - self.period..];
        let ma = window.iter().sum::<f64>() / self.period as f64;
        let stop_long = ma * (1.0 - self.percent / 100.0);
        let stop_short = ma * (1.0 + self.percent / 100.0);
        let close = *closes.last().unwrap();

        let signal = if close > stop_long {
            "LONG"
        } else if close < stop_short {
            "SHORT"
        } else {
            "NONE"
        };

        let round6 = |v: f64| (v * 1_000_000.0).round() / 1_000_000.0;

        IndicatorResult {
            signal: signal.to_string(),
            data: json!({
                "ma": round6(ma),
                "stop_line_long": round6(stop_long),
                "stop_line_short": round6(stop_short),
                "close": round6(close),
                "period": self.period,
                "percent": self.percent,
            }),
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
                high: dec!(1),
                low: dec!(1),
                close: rust_decimal::Decimal::try_from(c).unwrap(),
                volume: dec!(1),
                timestamp: i as i64,
                is_closed: true,
            })
            .collect()
    }

    #[test]
    fn close_above_stop_long_emits_long() {
        let closes = vec![100.0; 25];
        let klines = klines_with_closes(&closes);
        let mut ind = MaStopIndicator::from_params(&serde_json::json!({"period": 20, "percent": 2.0}));
        ind.initialize(&klines);
        let result = ind.calculate(&klines);
        assert_eq!(result.signal, "LONG");
    }

    #[test]
    fn insufficient_data_returns_error_payload() {
        let klines = klines_with_closes(&[100.0; 5]);
        let mut ind = MaStopIndicator::from_params(&serde_json::json!({"period": 20}));
        let result = ind.calculate(&klines);
        assert_eq!(result.signal, "NONE");
        assert!(result.data.get("error").is_some());
    }

    #[test]
    fn sharp_drop_triggers_short_stop() {
        let mut closes = vec![100.0; 20];
        closes.push(90.0);
        let klines = klines_with_closes(&closes);
        let mut ind = MaStopIndicator::from_params(&serde_json::json!({"period": 20, "percent": 2.0}));
        ind.initialize(&klines);
        let result = ind.calculate(&klines);
        assert_eq!(result.signal, "SHORT");
    }
}
