// =============================================================================
// Kline — OHLCV bucket, Decimal-precise
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// One OHLCV bucket. Decimal fields preserve the exchange's decimal-string
/// wire format exactly — no `f64` rounding ever touches price or volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Kline {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub timestamp: i64,
    pub is_closed: bool,
}

impl Kline {
    pub fn to_json(&self) -> Value {
        json!({
            "open": self.open.to_string(),
            "high": self.high.to_string(),
            "low": self.low.to_string(),
            "close": self.close.to_string(),
            "volume": self.volume.to_string(),
            "timestamp": self.timestamp,
            "is_closed": self.is_closed,
        })
    }

    /// Parse from the wrapped `{open, high, ...}` object shape this crate
    /// uses on the wire between DE and TA (as distinct from Binance's own
    /// raw `k` object, handled in `market_stream::parse_kline_payload`).
    pub fn from_json(value: &Value) -> Option<Kline> {
        let obj = value.as_object()?;
        Some(Kline {
            open: parse_decimal(obj, "open")?,
            high: parse_decimal(obj, "high")?,
            low: parse_decimal(obj, "low")?,
            close: parse_decimal(obj, "close")?,
            volume: parse_decimal(obj, "volume")?,
            timestamp: obj.get("timestamp")?.as_i64()?,
            is_closed: obj.get("is_closed").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

fn parse_decimal(obj: &Map<String, Value>, key: &str) -> Option<Decimal> {
    let v = obj.get(key)?;
    if let Some(s) = v.as_str() {
        s.parse().ok()
    } else if let Some(n) = v.as_f64() {
        Decimal::try_from(n).ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn round_trips_through_json_without_precision_loss() {
        let k = Kline {
            open: dec!(1.23456789),
            high: dec!(1.3),
            low: dec!(1.1),
            close: dec!(1.25),
            volume: dec!(1000.5),
            timestamp: 1_700_000_000_000,
            is_closed: true,
        };
        let json = k.to_json();
        let back = Kline::from_json(&json).unwrap();
        assert_eq!(k, back);
    }
}
