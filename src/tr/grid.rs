// =============================================================================
// Grid construction — symmetric and directional ladder building
// =============================================================================
//
// Ported from the Python original's `grid_calculator.py`; the teacher has no
// grid-trading concept at all (it trades single ATR-stopped positions), so
// this module's algorithm is grounded entirely on the base spec's "Grid
// construction" section and its literal scenario-6 test vector.
// =============================================================================

use rust_decimal::Decimal;

use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridError {
    InvalidBounds,
    InvalidLevels,
}

impl std::fmt::Display for GridError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBounds => write!(f, "upper must be greater than lower"),
            Self::InvalidLevels => write!(f, "levels must be positive"),
        }
    }
}

impl std::error::Error for GridError {}

/// One rung of a constructed ladder: a price plus the side of order it
/// implies (BUY below entry, SELL above) and the quantity to place there.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridRung {
    pub price: Decimal,
    pub side: Side,
    pub quantity: Decimal,
}

/// Build the `levels + 1` evenly spaced price points between `lower` and
/// `upper`, inclusive.
fn price_points(lower: Decimal, upper: Decimal, levels: u32) -> Result<Vec<Decimal>, GridError> {
    if upper <= lower {
        return Err(GridError::InvalidBounds);
    }
    if levels == 0 {
        return Err(GridError::InvalidLevels);
    }

    let interval = (upper - lower) / Decimal::from(levels);
    Ok((0..=levels).map(|i| lower + interval * Decimal::from(i)).collect())
}

/// Symmetric ladder around `entry_price`: prices below entry become BUY
/// rungs, prices above become SELL rungs, entry itself is excluded. Total
/// quantity is split evenly across every rung produced (both sides combined).
pub fn build_symmetric(
    entry_price: Decimal,
    upper: Decimal,
    lower: Decimal,
    levels: u32,
    total_qty: Decimal,
) -> Result<Vec<GridRung>, GridError> {
    let points = price_points(lower, upper, levels)?;
    let buy_prices: Vec<Decimal> = points.iter().copied().filter(|p| *p < entry_price).collect();
    let sell_prices: Vec<Decimal> = points.iter().copied().filter(|p| *p > entry_price).collect();

    let rung_count = buy_prices.len() + sell_prices.len();
    if rung_count == 0 {
        return Ok(Vec::new());
    }
    let qty_per_rung = total_qty / Decimal::from(rung_count as u64);

    let mut rungs: Vec<GridRung> = buy_prices
        .into_iter()
        .map(|price| GridRung { price, side: Side::Long, quantity: qty_per_rung })
        .collect();
    rungs.extend(sell_prices.into_iter().map(|price| GridRung {
        price,
        side: Side::Short,
        quantity: qty_per_rung,
    }));
    Ok(rungs)
}

/// Directional ladder: every price point gets a rung on the given `side`,
/// each sized `total_qty / levels`.
pub fn build_directional(
    side: Side,
    upper: Decimal,
    lower: Decimal,
    levels: u32,
    total_qty: Decimal,
) -> Result<Vec<GridRung>, GridError> {
    let points = price_points(lower, upper, levels)?;
    let qty_per_rung = total_qty / Decimal::from(levels);
    Ok(points.into_iter().map(|price| GridRung { price, side, quantity: qty_per_rung }).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn symmetric_grid_matches_literal_scenario() {
        let rungs = build_symmetric(dec!(1.00), dec!(1.05), dec!(0.95), 10, dec!(1000)).unwrap();
        assert_eq!(rungs.len(), 10);

        let buys: Vec<Decimal> = rungs.iter().filter(|r| r.side == Side::Long).map(|r| r.price).collect();
        let sells: Vec<Decimal> = rungs.iter().filter(|r| r.side == Side::Short).map(|r| r.price).collect();

        assert_eq!(buys.len(), 5);
        assert_eq!(sells.len(), 5);
        assert!(buys.contains(&dec!(0.95)));
        assert!(buys.contains(&dec!(0.99)));
        assert!(sells.contains(&dec!(1.01)));
        assert!(sells.contains(&dec!(1.05)));
        assert!(!buys.contains(&dec!(1.00)) && !sells.contains(&dec!(1.00)));

        for rung in &rungs {
            assert_eq!(rung.quantity, dec!(100));
        }
    }

    #[test]
    fn directional_grid_splits_evenly() {
        let rungs = build_directional(Side::Long, dec!(1.05), dec!(0.95), 10, dec!(1000)).unwrap();
        assert_eq!(rungs.len(), 11);
        for rung in &rungs {
            assert_eq!(rung.quantity, dec!(100));
            assert_eq!(rung.side, Side::Long);
        }
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        assert_eq!(build_symmetric(dec!(1.0), dec!(0.9), dec!(0.95), 10, dec!(1000)), Err(GridError::InvalidBounds));
    }

    #[test]
    fn zero_levels_are_rejected() {
        assert_eq!(build_symmetric(dec!(1.0), dec!(1.05), dec!(0.95), 0, dec!(1000)), Err(GridError::InvalidLevels));
    }
}
