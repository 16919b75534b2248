// Adapted from `crate::indicators::ema` — wraps the teacher's EMA math in
// the `Indicator` contract. Signal is a fast/slow crossover rather than the
// teacher's three-EMA trend-alignment check, since TA wants one signal per
// indicator instance, not a stack comparison.

use serde_json::{json, Value};

use crate::indicators::ema::calculate_ema;
use crate::ta::indicator::{closes_f64, Indicator, IndicatorResult};

pub struct EmaIndicator {
    fast_period: usize,
    slow_period: usize,
    ready: bool,
}

impl EmaIndicator {
    pub fn from_params(params: &Value) -> Self {
        let fast_period = params.get("fast_period").and_then(Value::as_u64).unwrap_or(9) as usize;
        let slow_period = params.get("slow_period").and_then(Value::as_u64).unwrap_or(21) as usize;
        Self { fast_period, slow_period, ready: false }
    }
}

impl Indicator for EmaIndicator {
    fn min_klines_required(&self) -> usize {
        self.slow_period.max(self.fast_period) + 1
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
        let fast = calculate_ema(&closes, self.fast_period);
        let slow = calculate_ema(&closes, self.slow_period);

        let (Some(&f), Some(&s)) = (fast.last(), slow.last()) else {
            return IndicatorResult::none(json!({"error": "insufficient data"}));
        };

        let signal = if f > s { "LONG" } else if f < s { "SHORT" } else { "NONE" };

        IndicatorResult {
            signal: signal.to_string(),
            data: json!({"ema_fast": f, "ema_slow": s}),
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
    fn rising_series_produces_long_signal() {
        let closes: Vec<i64> = (1..=50).collect();
        let klines = klines_with_closes(&closes);
        let mut ind = EmaIndicator::from_params(&json!({}));
        ind.initialize(&klines);
        assert!(ind.is_ready());
        let result = ind.calculate(&klines);
        assert_eq!(result.signal, "LONG");
    }
}
