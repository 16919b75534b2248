// =============================================================================
// Ensemble Strategy — weighted vote across an account's subscribed indicators
// =============================================================================
//
// Ported from the teacher's `StrategyEngine`/`WeightedScorer` ensemble idiom
// in `strategy.rs`: every indicator contributes a `(direction, confidence)`
// pair (here: `signal ∈ {LONG, SHORT, NONE}` collapsed to `±1`/`0`), weighted
// and summed into one score, thresholded into a final side.
// =============================================================================

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::types::Side;

pub struct EnsembleStrategy {
    /// indicator_name -> weight, read from each pair's `indicator_params`.
    weights: HashMap<String, f64>,
    threshold: f64,
}

impl EnsembleStrategy {
    pub fn new(weights: HashMap<String, f64>, threshold: f64) -> Self {
        Self { weights, threshold }
    }

    /// `indicators` is the `ta.calculation.completed` payload's `indicators`
    /// map: `{name: {signal, data}}`. Returns `None` for HOLD.
    pub fn on_indicators_completed(&self, indicators: &Map<String, Value>) -> Option<Side> {
        if indicators.is_empty() {
            return None;
        }

        let default_weight = 1.0 / indicators.len() as f64;
        let mut score = 0.0;

        for (name, entry) in indicators {
            let signal = entry.get("signal").and_then(Value::as_str).unwrap_or("NONE");
            let direction = match signal {
                "LONG" => 1.0,
                "SHORT" => -1.0,
                _ => 0.0,
            };
            let weight = self.weights.get(name).copied().unwrap_or(default_weight);
            score += direction * weight;
        }

        if score >= self.threshold {
            Some(Side::Long)
        } else if score <= -self.threshold {
            Some(Side::Short)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indicator(signal: &str) -> Value {
        serde_json::json!({"signal": signal, "data": {}})
    }

    #[test]
    fn unanimous_long_votes_produce_long() {
        let mut indicators = Map::new();
        indicators.insert("rsi".into(), indicator("LONG"));
        indicators.insert("ema".into(), indicator("LONG"));

        let strategy = EnsembleStrategy::new(HashMap::new(), 0.5);
        assert_eq!(strategy.on_indicators_completed(&indicators), Some(Side::Long));
    }

    #[test]
    fn split_votes_below_threshold_hold() {
        let mut indicators = Map::new();
        indicators.insert("rsi".into(), indicator("LONG"));
        indicators.insert("ema".into(), indicator("SHORT"));

        let strategy = EnsembleStrategy::new(HashMap::new(), 0.5);
        assert_eq!(strategy.on_indicators_completed(&indicators), None);
    }

    #[test]
    fn weighted_vote_can_override_majority() {
        let mut indicators = Map::new();
        indicators.insert("rsi".into(), indicator("SHORT"));
        indicators.insert("ema".into(), indicator("LONG"));
        indicators.insert("roc".into(), indicator("LONG"));

        let mut weights = HashMap::new();
        weights.insert("rsi".into(), 0.8);
        weights.insert("ema".into(), 0.1);
        weights.insert("roc".into(), 0.1);

        let strategy = EnsembleStrategy::new(weights, 0.5);
        assert_eq!(strategy.on_indicators_completed(&indicators), Some(Side::Short));
    }
}
