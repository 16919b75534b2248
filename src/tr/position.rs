// =============================================================================
// Position tracking and PnL — one TradingTask per (user_id, symbol)
// =============================================================================
//
// Ported from the teacher's `position_engine::Position`/`PositionManager`
// open/close life-cycle idiom (UUID-tagged positions, `RwLock`-guarded
// vectors, structured `info!` logging of every open/close) — generalised
// from the teacher's ATR-stop/TP-ladder exit model to the base spec's
// simpler open-one-position-then-close-or-grid-pair model, since grid
// trading replaces the teacher's trailing-stop exit logic entirely.
// =============================================================================

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::Side;

use super::grid::GridRung;

const FEE_RATE: Decimal = dec!(0.0004);

/// Realised PnL on a full position close, fee rate 0.0004 per leg.
pub fn close_pnl(side: Side, entry: Decimal, exit: Decimal, qty: Decimal) -> Decimal {
    let gross = match side {
        Side::Long => (exit - entry) * qty,
        Side::Short => (entry - exit) * qty,
    };
    let fee = entry * qty * FEE_RATE + exit * qty * FEE_RATE;
    gross - fee
}

/// Profit on one completed grid pair: `(sell − buy) × qty − fees`.
pub fn grid_pair_profit(buy_price: Decimal, sell_price: Decimal, qty: Decimal) -> Decimal {
    let gross = (sell_price - buy_price) * qty;
    let fee = buy_price * qty * FEE_RATE + sell_price * qty * FEE_RATE;
    gross - fee
}

/// An order placed by TR and awaiting a fill/cancel, recorded under its
/// owning task.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub order_id: Option<u64>,
    pub side: Side,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub is_close: bool,
    pub grid_rung: Option<GridRung>,
}

/// An open exposure: side, entry price, remaining quantity.
#[derive(Debug, Clone, Copy)]
pub struct OpenPosition {
    pub side: Side,
    pub entry_price: Decimal,
    pub quantity: Decimal,
}

/// Per-(user_id, symbol) trading state: pending orders, the open position
/// if any, and accumulated realised PnL (including completed grid pairs).
///
/// Orders are tracked as a flat list rather than a map keyed by exchange
/// order id: TR emits `trading.order.create` before the exchange has
/// assigned an id, so a freshly-created record starts with `order_id: None`
/// and is matched up once the corresponding `de.order.submitted` arrives.
#[derive(Debug, Clone)]
pub struct TradingTask {
    pub user_id: String,
    pub symbol: String,
    pub orders: Vec<OrderRecord>,
    pub position: Option<OpenPosition>,
    pub realized_pnl: Decimal,
    /// Filled BUY rungs awaiting their paired SELL leg, by price.
    pub filled_buy_legs: Vec<(Decimal, Decimal)>,
}

impl TradingTask {
    pub fn new(user_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            symbol: symbol.into(),
            orders: Vec::new(),
            position: None,
            realized_pnl: Decimal::ZERO,
            filled_buy_legs: Vec::new(),
        }
    }

    pub fn push_pending_order(&mut self, order: OrderRecord) {
        self.orders.push(order);
    }

    /// Assign `order_id` to the oldest still-unassigned record on `side`,
    /// returning whether a match was found.
    pub fn assign_order_id(&mut self, side: Side, order_id: u64) -> bool {
        if let Some(pending) = self.orders.iter_mut().find(|o| o.order_id.is_none() && o.side == side) {
            pending.order_id = Some(order_id);
            true
        } else {
            false
        }
    }

    pub fn order_by_id(&self, order_id: u64) -> Option<&OrderRecord> {
        self.orders.iter().find(|o| o.order_id == Some(order_id))
    }

    pub fn remove_order(&mut self, order_id: u64) -> Option<OrderRecord> {
        let idx = self.orders.iter().position(|o| o.order_id == Some(order_id))?;
        Some(self.orders.remove(idx))
    }

    /// Order ids of every outstanding (unfilled) grid rung — used to cancel
    /// the ladder when the task's signal flips to CLOSE.
    pub fn grid_order_ids(&self) -> Vec<u64> {
        self.orders.iter().filter(|o| o.grid_rung.is_some()).filter_map(|o| o.order_id).collect()
    }

    /// Process a grid-rung fill: record the BUY leg, or pair it against the
    /// oldest unmatched BUY leg below it and accrue the pair's profit.
    pub fn settle_grid_fill(&mut self, side: Side, price: Decimal, qty: Decimal) -> Option<Decimal> {
        match side {
            Side::Long => {
                self.filled_buy_legs.push((price, qty));
                None
            }
            Side::Short => {
                if self.filled_buy_legs.is_empty() {
                    return None;
                }
                let (buy_price, buy_qty) = self.filled_buy_legs.remove(0);
                let pair_qty = buy_qty.min(qty);
                let profit = grid_pair_profit(buy_price, price, pair_qty);
                self.realized_pnl += profit;
                Some(profit)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_5_close_pnl_matches_literal_value() {
        let profit = close_pnl(Side::Long, dec!(1.00), dec!(1.10), dec!(38000));
        assert_eq!(profit, dec!(3768.08));
    }

    #[test]
    fn pnl_symmetry_between_long_and_short() {
        let long_profit = close_pnl(Side::Long, dec!(1.00), dec!(1.10), dec!(100));
        let short_profit = close_pnl(Side::Short, dec!(1.10), dec!(1.00), dec!(100));
        assert_eq!(long_profit.abs(), short_profit.abs());
    }

    #[test]
    fn grid_pair_profit_matches_formula() {
        let profit = grid_pair_profit(dec!(0.95), dec!(1.01), dec!(100));
        let expected = (dec!(1.01) - dec!(0.95)) * dec!(100) - (dec!(0.95) * dec!(100) * dec!(0.0004) + dec!(1.01) * dec!(100) * dec!(0.0004));
        assert_eq!(profit, expected);
    }

    #[test]
    fn grid_fill_pairs_buy_then_sell() {
        let mut task = TradingTask::new("u1", "XRPUSDC");
        assert!(task.settle_grid_fill(Side::Long, dec!(0.95), dec!(100)).is_none());
        let profit = task.settle_grid_fill(Side::Short, dec!(1.01), dec!(100)).unwrap();
        assert!(profit > Decimal::ZERO);
        assert_eq!(task.realized_pnl, profit);
    }

    #[test]
    fn pending_order_is_matched_by_side_then_removable() {
        let mut task = TradingTask::new("u1", "XRPUSDC");
        task.push_pending_order(OrderRecord {
            order_id: None,
            side: Side::Long,
            price: None,
            quantity: dec!(38000),
            is_close: false,
            grid_rung: None,
        });

        assert!(task.assign_order_id(Side::Long, 555));
        assert!(task.order_by_id(555).is_some());

        let removed = task.remove_order(555).unwrap();
        assert_eq!(removed.quantity, dec!(38000));
        assert!(task.order_by_id(555).is_none());
    }
}
