// =============================================================================
// Capital management — balance tracking, position sizing, trading-mode
// derivation
// =============================================================================
//
// New module; the teacher sizes positions from a single fixed
// `base_position_pct` of one account's balance (`strategy.rs`'s
// `StrategyEngine::evaluate_symbol`). This generalises that idiom to the
// base spec's multi-symbol capital split and the three-way NO_GRID /
// NORMAL_GRID / ABNORMAL_GRID mode derivation, grounded in the Python
// original's capital-allocation formulas verbatim.
// =============================================================================

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::st::GridTradingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingMode {
    NoGrid,
    NormalGrid,
    AbnormalGrid,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoGrid => write!(f, "NO_GRID"),
            Self::NormalGrid => write!(f, "NORMAL_GRID"),
            Self::AbnormalGrid => write!(f, "ABNORMAL_GRID"),
        }
    }
}

/// Derive the trading mode from a strategy's `grid_trading` block, per the
/// base spec's exact branching rules.
pub fn trading_mode(grid: Option<&GridTradingConfig>) -> TradingMode {
    let Some(grid) = grid.filter(|g| g.enabled) else {
        return TradingMode::NoGrid;
    };

    if grid.grid_type == "normal" && grid.ratio == 1.0 {
        TradingMode::NormalGrid
    } else {
        TradingMode::AbnormalGrid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapitalError {
    NonPositiveInput,
    RatioOutOfRange,
}

impl std::fmt::Display for CapitalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonPositiveInput => write!(f, "capital inputs must be positive"),
            Self::RatioOutOfRange => write!(f, "ratio must be in (0, 1]"),
        }
    }
}

impl std::error::Error for CapitalError {}

/// Tracks one account's exchange balance and the fixed set of symbols its
/// strategy trades, and derives per-symbol position sizes from it.
#[derive(Debug, Clone)]
pub struct CapitalManager {
    pub leverage: u32,
    pub symbol_count: usize,
    pub available_balance: Decimal,
    pub total_balance: Decimal,
}

impl CapitalManager {
    pub fn new(leverage: u32, symbol_count: usize) -> Self {
        Self {
            leverage,
            symbol_count: symbol_count.max(1),
            available_balance: Decimal::ZERO,
            total_balance: Decimal::ZERO,
        }
    }

    pub fn update_balance(&mut self, available_balance: Decimal, total_balance: Decimal) {
        self.available_balance = available_balance;
        self.total_balance = total_balance;
    }

    fn usable_balance(&self) -> Decimal {
        self.available_balance * dec!(0.95)
    }

    fn margin_per_symbol(&self) -> Decimal {
        self.usable_balance() / Decimal::from(self.symbol_count as u64)
    }

    /// `(margin × ratio × leverage) / entry_price`.
    pub fn position_size(&self, ratio: Decimal, entry_price: Decimal) -> Result<Decimal, CapitalError> {
        if entry_price <= Decimal::ZERO || self.available_balance <= Decimal::ZERO {
            return Err(CapitalError::NonPositiveInput);
        }
        if ratio <= Decimal::ZERO || ratio > Decimal::ONE {
            return Err(CapitalError::RatioOutOfRange);
        }

        let margin = self.margin_per_symbol();
        Ok(margin * ratio * Decimal::from(self.leverage) / entry_price)
    }

    /// `position_size / grid_levels`.
    pub fn grid_position_size(&self, ratio: Decimal, entry_price: Decimal, grid_levels: u32) -> Result<Decimal, CapitalError> {
        if grid_levels == 0 {
            return Err(CapitalError::NonPositiveInput);
        }
        let size = self.position_size(ratio, entry_price)?;
        Ok(size / Decimal::from(grid_levels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::st::GridTradingConfig;

    #[test]
    fn no_grid_when_disabled() {
        assert_eq!(trading_mode(None), TradingMode::NoGrid);
    }

    #[test]
    fn normal_grid_requires_ratio_one() {
        let grid = GridTradingConfig {
            enabled: true,
            grid_type: "normal".into(),
            ratio: 1.0,
            grid_levels: 10,
            move_up: 5.0,
            move_down: 5.0,
        };
        assert_eq!(trading_mode(Some(&grid)), TradingMode::NormalGrid);
    }

    #[test]
    fn abnormal_grid_when_ratio_below_one() {
        let grid = GridTradingConfig {
            enabled: true,
            grid_type: "normal".into(),
            ratio: 0.5,
            grid_levels: 10,
            move_up: 5.0,
            move_down: 5.0,
        };
        assert_eq!(trading_mode(Some(&grid)), TradingMode::AbnormalGrid);
    }

    #[test]
    fn scenario_5_no_grid_position_size() {
        let mut capital = CapitalManager::new(4, 1);
        capital.update_balance(dec!(10000), dec!(10000));

        let size = capital.position_size(dec!(1), dec!(1.00)).unwrap();
        assert_eq!(size, dec!(38000));
    }

    #[test]
    fn rejects_non_positive_entry_price() {
        let mut capital = CapitalManager::new(4, 1);
        capital.update_balance(dec!(10000), dec!(10000));
        assert_eq!(capital.position_size(dec!(1), dec!(0)), Err(CapitalError::NonPositiveInput));
    }

    #[test]
    fn rejects_ratio_out_of_range() {
        let mut capital = CapitalManager::new(4, 1);
        capital.update_balance(dec!(10000), dec!(10000));
        assert_eq!(capital.position_size(dec!(1.5), dec!(1.00)), Err(CapitalError::RatioOutOfRange));
    }
}
