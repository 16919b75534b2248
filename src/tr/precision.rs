// =============================================================================
// Precision — symbol price/quantity quantisation and min-notional checks
// =============================================================================
//
// Translated 1:1 from the Python original's `precision_handler.py`:
// `Decimal` quantised with `ROUND_DOWN`, default price precision 2 decimal
// places, quantity precision 0, min-notional 5 USD-equivalent. The teacher
// has no notion of symbol precision at all (it trades spot market orders
// sized in whole-unit quantities) so this is a new module grounded entirely
// on the Python original plus `rust_decimal`'s own truncation idiom.
// =============================================================================

use rust_decimal::Decimal;

/// Per-symbol precision + minimum-notional rules. Falls back to the
/// documented defaults when a symbol has no explicit entry.
#[derive(Debug, Clone, Copy)]
pub struct SymbolPrecision {
    pub price_decimals: u32,
    pub quantity_decimals: u32,
    pub min_notional: Decimal,
}

impl Default for SymbolPrecision {
    fn default() -> Self {
        Self {
            price_decimals: 2,
            quantity_decimals: 0,
            min_notional: Decimal::new(5, 0),
        }
    }
}

/// Truncates (never rounds) `value` down to `decimals` places — `ROUND_DOWN`,
/// not round-half-even. Matches `Decimal.quantize(..., rounding=ROUND_DOWN)`
/// in the Python original.
pub fn truncate(value: Decimal, decimals: u32) -> Decimal {
    value.trunc_with_scale(decimals)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecisionError {
    BelowMinNotional,
}

impl std::fmt::Display for PrecisionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BelowMinNotional => write!(f, "order notional is below the symbol's minimum"),
        }
    }
}

impl std::error::Error for PrecisionError {}

/// Quantise `price`/`quantity` to `precision`'s decimal places and reject
/// orders whose notional falls below the configured minimum.
pub fn quantize_order(
    precision: &SymbolPrecision,
    price: Decimal,
    quantity: Decimal,
) -> Result<(Decimal, Decimal), PrecisionError> {
    let price = truncate(price, precision.price_decimals);
    let quantity = truncate(quantity, precision.quantity_decimals);

    if price * quantity < precision.min_notional {
        return Err(PrecisionError::BelowMinNotional);
    }

    Ok((price, quantity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn truncate_never_rounds_up() {
        assert_eq!(truncate(dec!(1.2399), 2), dec!(1.23));
        assert_eq!(truncate(dec!(1.2399), 0), dec!(1));
    }

    #[test]
    fn quantize_order_truncates_both_fields() {
        let precision = SymbolPrecision::default();
        let (price, qty) = quantize_order(&precision, dec!(1.23456), dec!(10.9)).unwrap();
        assert_eq!(price, dec!(1.23));
        assert_eq!(qty, dec!(10));
    }

    #[test]
    fn quantize_order_rejects_below_min_notional() {
        let precision = SymbolPrecision::default();
        let result = quantize_order(&precision, dec!(0.01), dec!(1));
        assert_eq!(result, Err(PrecisionError::BelowMinNotional));
    }
}
