// =============================================================================
// TR — Trading Engine: capital allocation, order routing, grid execution
// =============================================================================
//
// New top-level module; the teacher's `ExecutionEngine`/`PositionManager`
// trade one position at a time with ATR-based SL/TP, not grid ladders. TR
// keeps the teacher's shape — a manager owning per-key state behind
// `parking_lot::RwLock`, routing through events rather than direct calls —
// generalised to the base spec's capital-split + NO_GRID/NORMAL_GRID/
// ABNORMAL_GRID + grid-pairing model, grounded in the Python original's
// `grid_calculator.py`/`profit_calculator.py`/`precision_handler.py`.
// =============================================================================

pub mod capital;
pub mod grid;
pub mod precision;
pub mod position;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::de::kline::Kline;
use crate::event::{Event, EventBus, Handler};
use crate::st::StrategyConfig;
use crate::types::{OrderType, Side};

use capital::{trading_mode, CapitalManager, TradingMode};
use grid::{build_symmetric, GridRung};
use position::{close_pnl, OrderRecord, TradingTask};
use precision::{quantize_order, SymbolPrecision};

type TaskKey = (String, String);

/// Singleton trading manager. Owns each account's `CapitalManager` and one
/// `TradingTask` per `(user_id, symbol)`.
pub struct TrManager {
    bus: Arc<EventBus>,
    config_dir: PathBuf,
    configs: RwLock<HashMap<String, Arc<StrategyConfig>>>,
    capitals: RwLock<HashMap<String, CapitalManager>>,
    tasks: RwLock<HashMap<TaskKey, TradingTask>>,
    last_prices: RwLock<HashMap<TaskKey, Decimal>>,
}

impl TrManager {
    pub fn new(bus: Arc<EventBus>, config_dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            bus,
            config_dir: config_dir.into(),
            configs: RwLock::new(HashMap::new()),
            capitals: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
            last_prices: RwLock::new(HashMap::new()),
        })
    }

    pub fn register_handlers(self: &Arc<Self>) {
        self.bus.subscribe("pm.account.loaded", Arc::new(OnAccountLoaded { tr: self.clone() }));
        self.bus.subscribe("de.account.balance", Arc::new(OnAccountBalance { tr: self.clone() }));
        // The base spec's subject list for TR omits a market-price feed, yet
        // MARKET-order sizing divides by `entry_price` (§4.10, scenario 5).
        // Resolved here: TR also watches kline closes to keep a last-price
        // cache, the only source of a pre-fill price it has available.
        self.bus.subscribe("de.kline.update", Arc::new(OnKlineUpdate { tr: self.clone() }));
        self.bus.subscribe("st.signal.generated", Arc::new(OnSignalGenerated { tr: self.clone() }));
        self.bus.subscribe("st.grid.create", Arc::new(OnGridCreate { tr: self.clone() }));
        self.bus.subscribe("de.order.submitted", Arc::new(OnOrderSubmitted { tr: self.clone() }));
        self.bus.subscribe("de.order.filled", Arc::new(OnOrderFilled { tr: self.clone() }));
        self.bus.subscribe("de.order.update", Arc::new(OnOrderUpdate { tr: self.clone() }));
        self.bus.subscribe("de.order.failed", Arc::new(OnOrderFailed { tr: self.clone() }));
        self.bus.subscribe("de.order.cancelled", Arc::new(OnOrderCancelled { tr: self.clone() }));
    }

    fn strategy_path(&self, user_id: &str, strategy_name: &str) -> PathBuf {
        self.config_dir.join("strategies").join(user_id).join(format!("{strategy_name}.json"))
    }

    /// Read-only snapshot of every tracked trading task, for the dashboard.
    pub fn snapshot(&self) -> Vec<Value> {
        self.tasks
            .read()
            .values()
            .map(|task| {
                let position = task.position.map(|p| {
                    json!({
                        "side": p.side.to_string(),
                        "entry_price": p.entry_price.to_string(),
                        "quantity": p.quantity.to_string(),
                    })
                });
                json!({
                    "user_id": task.user_id,
                    "symbol": task.symbol,
                    "position": position,
                    "pending_orders": task.orders.len(),
                    "realized_pnl": task.realized_pnl.to_string(),
                })
            })
            .collect()
    }

    async fn on_account_loaded(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default().to_string();
        let strategy_name = event.get_str("strategy_name").unwrap_or_default().to_string();
        let path = self.strategy_path(&user_id, &strategy_name);

        let config = match StrategyConfig::load(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(user_id, strategy_name, error = %e, "TR could not load strategy config");
                return;
            }
        };

        let capital = CapitalManager::new(config.leverage, config.trading_pairs.len());
        self.capitals.write().insert(user_id.clone(), capital);
        self.configs.write().insert(user_id.clone(), Arc::new(config));

        let mut data = Map::new();
        data.insert("user_id".into(), json!(user_id));
        data.insert("asset".into(), json!("USDT"));
        self.bus.publish(Event::with_source("trading.get_account_balance", data, "tr"), true).await;
    }

    async fn on_account_balance(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default();
        let Some(balance) = event.get_str("balance").and_then(|s| s.parse::<Decimal>().ok()) else {
            return;
        };
        let Some(available) = event.get_str("available_balance").and_then(|s| s.parse::<Decimal>().ok()) else {
            return;
        };

        if let Some(capital) = self.capitals.write().get_mut(user_id) {
            capital.update_balance(available, balance);
        }
    }

    async fn on_kline_update(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default().to_string();
        let symbol = event.get_str("symbol").unwrap_or_default().to_string();
        let Some(kline) = event.get("kline").and_then(Kline::from_json) else {
            return;
        };
        self.last_prices.write().insert((user_id, symbol), kline.close);
    }

    fn config_for(&self, user_id: &str) -> Option<Arc<StrategyConfig>> {
        self.configs.read().get(user_id).cloned()
    }

    async fn on_signal_generated(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default().to_string();
        let symbol = event.get_str("symbol").unwrap_or_default().to_string();
        let side_str = event.get_str("side").unwrap_or("LONG");
        let action = event.get_str("action").unwrap_or("OPEN");
        let side = if side_str == "SHORT" { Side::Short } else { Side::Long };

        let Some(config) = self.config_for(&user_id) else {
            warn!(user_id, symbol, "signal received with no strategy config loaded");
            return;
        };

        match action {
            "OPEN" => self.open_signal(&user_id, &symbol, side, &config).await,
            "CLOSE" => self.close_signal(&user_id, &symbol).await,
            other => warn!(user_id, symbol, action = other, "unknown signal action"),
        }
    }

    async fn open_signal(&self, user_id: &str, symbol: &str, side: Side, config: &StrategyConfig) {
        let key = (user_id.to_string(), symbol.to_string());
        if self.tasks.read().get(&key).map(|t| t.position.is_some()).unwrap_or(false) {
            return;
        }

        let mode = trading_mode(config.grid_trading.as_ref());
        let Some(entry_price) = self.last_prices.read().get(&key).copied() else {
            warn!(user_id, symbol, "no known market price yet — cannot size entry order");
            return;
        };

        self.tasks.write().entry(key.clone()).or_insert_with(|| TradingTask::new(user_id, symbol));

        match mode {
            TradingMode::NoGrid | TradingMode::AbnormalGrid => {
                let ratio = match mode {
                    TradingMode::AbnormalGrid => config.grid_trading.as_ref().map(|g| g.ratio).unwrap_or(1.0),
                    _ => 1.0,
                };
                let Ok(ratio_dec) = Decimal::try_from(ratio) else { return };

                let quantity = {
                    let capitals = self.capitals.read();
                    let Some(capital) = capitals.get(user_id) else { return };
                    match capital.position_size(ratio_dec, entry_price) {
                        Ok(q) => q,
                        Err(e) => {
                            warn!(user_id, symbol, error = %e, "position sizing failed");
                            return;
                        }
                    }
                };

                let precision = SymbolPrecision::default();
                let (_, quantity) = match quantize_order(&precision, entry_price, quantity) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(user_id, symbol, error = %e, "entry order rejected by precision/min-notional check");
                        return;
                    }
                };

                self.submit_market_order(user_id, symbol, side, quantity, false).await;
            }
            TradingMode::NormalGrid => {
                let quantity = {
                    let capitals = self.capitals.read();
                    let Some(capital) = capitals.get(user_id) else { return };
                    match capital.position_size(Decimal::ONE, entry_price) {
                        Ok(q) => q,
                        Err(e) => {
                            warn!(user_id, symbol, error = %e, "position sizing failed");
                            return;
                        }
                    }
                };

                // No preliminary market order for NORMAL_GRID: open the
                // notional position directly so ST's `tr.position.opened`
                // listener fires `st.grid.create` and the ladder is placed.
                if let Some(task) = self.tasks.write().get_mut(&key) {
                    task.position = Some(position::OpenPosition { side, entry_price, quantity });
                }
                self.emit_position_opened(user_id, symbol, side, entry_price, quantity).await;
            }
        }
    }

    async fn close_signal(&self, user_id: &str, symbol: &str) {
        let key = (user_id.to_string(), symbol.to_string());
        let (grid_order_ids, position) = {
            let tasks = self.tasks.read();
            let Some(task) = tasks.get(&key) else { return };
            let Some(position) = task.position else { return };
            (task.grid_order_ids(), position)
        };

        for order_id in grid_order_ids {
            let mut data = Map::new();
            data.insert("user_id".into(), json!(user_id));
            data.insert("symbol".into(), json!(symbol));
            data.insert("order_id".into(), json!(order_id));
            self.bus.publish(Event::with_source("trading.order.cancel", data, "tr"), true).await;
        }

        self.submit_market_order(user_id, symbol, position.side.opposite(), position.quantity, true).await;
    }

    async fn submit_market_order(&self, user_id: &str, symbol: &str, side: Side, quantity: Decimal, is_close: bool) {
        let key = (user_id.to_string(), symbol.to_string());
        if let Some(task) = self.tasks.write().get_mut(&key) {
            task.push_pending_order(OrderRecord {
                order_id: None,
                side,
                price: None,
                quantity,
                is_close,
                grid_rung: None,
            });
        }

        let mut data = Map::new();
        data.insert("user_id".into(), json!(user_id));
        data.insert("symbol".into(), json!(symbol));
        data.insert("side".into(), json!(side.order_side()));
        data.insert("order_type".into(), json!(OrderType::Market.to_string()));
        data.insert("quantity".into(), json!(quantity.to_string()));
        self.bus.publish(Event::with_source("trading.order.create", data, "tr"), true).await;
    }

    async fn on_grid_create(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default().to_string();
        let symbol = event.get_str("symbol").unwrap_or_default().to_string();
        let key = (user_id.clone(), symbol.clone());

        let Some(config) = self.config_for(&user_id) else { return };
        let mode = trading_mode(config.grid_trading.as_ref());
        if mode == TradingMode::NoGrid {
            return;
        }
        if !self.tasks.read().get(&key).map(|t| t.position.is_some()).unwrap_or(false) {
            return;
        }

        let Some(entry_price) = event.get_str("entry_price").and_then(|s| s.parse::<f64>().ok()) else { return };
        let Some(entry_price) = Decimal::try_from(entry_price).ok() else { return };
        let grid_levels = event.get("grid_levels").and_then(Value::as_u64).unwrap_or(10) as u32;
        let move_up = event.get("move_up").and_then(Value::as_f64).unwrap_or(5.0);
        let move_down = event.get("move_down").and_then(Value::as_f64).unwrap_or(5.0);
        let grid_ratio = event.get("grid_ratio").and_then(Value::as_f64).unwrap_or(1.0);

        let Ok(upper) = Decimal::try_from(move_up / 100.0 + 1.0) else { return };
        let Ok(lower) = Decimal::try_from(1.0 - move_down / 100.0) else { return };
        let upper_price = entry_price * upper;
        let lower_price = entry_price * lower;

        // ABNORMAL_GRID reserves the capital fraction the preliminary market
        // order did *not* use; NORMAL_GRID has no preliminary order, so the
        // whole allocated margin goes into the ladder.
        let remaining_ratio = match mode {
            TradingMode::NormalGrid => 1.0,
            _ => 1.0 - grid_ratio,
        };
        if remaining_ratio <= 0.0 {
            return;
        }
        let Ok(remaining_ratio_dec) = Decimal::try_from(remaining_ratio) else { return };

        let total_qty = {
            let capitals = self.capitals.read();
            let Some(capital) = capitals.get(&user_id) else { return };
            match capital.position_size(remaining_ratio_dec, entry_price) {
                Ok(q) => q,
                Err(_) => return,
            }
        };

        let rungs = match build_symmetric(entry_price, upper_price, lower_price, grid_levels, total_qty) {
            Ok(r) => r,
            Err(e) => {
                warn!(user_id, symbol, error = %e, "grid construction failed");
                return;
            }
        };

        for rung in rungs {
            self.submit_grid_rung(&user_id, &symbol, rung).await;
        }
    }

    async fn submit_grid_rung(&self, user_id: &str, symbol: &str, rung: GridRung) {
        let precision = SymbolPrecision::default();
        let (price, quantity) = match quantize_order(&precision, rung.price, rung.quantity) {
            Ok(v) => v,
            Err(e) => {
                warn!(user_id, symbol, price = %rung.price, error = %e, "grid rung rejected");
                return;
            }
        };

        let key = (user_id.to_string(), symbol.to_string());
        if let Some(task) = self.tasks.write().get_mut(&key) {
            task.push_pending_order(OrderRecord {
                order_id: None,
                side: rung.side,
                price: Some(price),
                quantity,
                is_close: false,
                grid_rung: Some(GridRung { price, side: rung.side, quantity }),
            });
        }

        let mut data = Map::new();
        data.insert("user_id".into(), json!(user_id));
        data.insert("symbol".into(), json!(symbol));
        data.insert("side".into(), json!(rung.side.order_side()));
        data.insert("order_type".into(), json!(OrderType::PostOnly.to_string()));
        data.insert("price".into(), json!(price.to_string()));
        data.insert("quantity".into(), json!(quantity.to_string()));
        self.bus.publish(Event::with_source("trading.order.create", data, "tr"), true).await;
    }

    async fn on_order_submitted(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default().to_string();
        let symbol = event.get_str("symbol").unwrap_or_default().to_string();
        let side_str = event.get_str("side").unwrap_or("BUY");
        let side = if side_str == "SELL" { Side::Short } else { Side::Long };
        let Some(order_id) = event.get("order_id").and_then(Value::as_u64) else { return };

        let key = (user_id, symbol);
        if let Some(task) = self.tasks.write().get_mut(&key) {
            task.assign_order_id(side, order_id);
        }
    }

    async fn on_order_filled(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default().to_string();
        let symbol = event.get_str("symbol").unwrap_or_default().to_string();
        let Some(order_id) = event.get("order_id").and_then(Value::as_u64) else { return };
        let Some(price) = event.get("price").and_then(Value::as_f64).and_then(|f| Decimal::try_from(f).ok()) else { return };
        let Some(quantity) = event.get("quantity").and_then(Value::as_f64).and_then(|f| Decimal::try_from(f).ok()) else { return };

        let key = (user_id.clone(), symbol.clone());

        enum FillOutcome {
            Opened { side: Side, quantity: Decimal },
            Closed { side: Side, profit: Decimal },
            None,
        }

        let outcome = {
            let mut tasks = self.tasks.write();
            let Some(task) = tasks.get_mut(&key) else { return };
            let Some(order) = task.order_by_id(order_id).cloned() else { return };

            if order.grid_rung.is_some() {
                task.settle_grid_fill(order.side, order.grid_rung.as_ref().unwrap().price, quantity);
                task.remove_order(order_id);
                FillOutcome::None
            } else if task.position.is_none() {
                task.position = Some(position::OpenPosition { side: order.side, entry_price: price, quantity });
                task.remove_order(order_id);
                FillOutcome::Opened { side: order.side, quantity }
            } else if order.is_close {
                let opened = task.position.take().unwrap();
                let profit = close_pnl(opened.side, opened.entry_price, price, quantity);
                task.realized_pnl += profit;
                task.remove_order(order_id);
                FillOutcome::Closed { side: opened.side, profit }
            } else {
                warn!(user_id, symbol, order_id, "fill matched neither an entry nor an outstanding close order");
                FillOutcome::None
            }
        };

        match outcome {
            FillOutcome::Opened { side, quantity } => {
                self.emit_position_opened(&user_id, &symbol, side, price, quantity).await;
            }
            FillOutcome::Closed { side, profit } => {
                self.emit_position_closed(&user_id, &symbol, side, price, profit).await;
            }
            FillOutcome::None => {}
        }
    }

    async fn emit_position_opened(&self, user_id: &str, symbol: &str, side: Side, entry_price: Decimal, quantity: Decimal) {
        info!(user_id, symbol, side = %side, entry_price = %entry_price, quantity = %quantity, "position opened");
        let mut data = Map::new();
        data.insert("user_id".into(), json!(user_id));
        data.insert("symbol".into(), json!(symbol));
        data.insert("side".into(), json!(side.to_string()));
        data.insert("entry_price".into(), json!(entry_price.to_string()));
        data.insert("quantity".into(), json!(quantity.to_string()));
        self.bus.publish(Event::with_source("tr.position.opened", data, "tr"), true).await;
    }

    async fn emit_position_closed(&self, user_id: &str, symbol: &str, side: Side, exit_price: Decimal, profit: Decimal) {
        info!(user_id, symbol, side = %side, exit_price = %exit_price, profit = %profit, "position closed");
        let mut data = Map::new();
        data.insert("user_id".into(), json!(user_id));
        data.insert("symbol".into(), json!(symbol));
        data.insert("side".into(), json!(side.to_string()));
        data.insert("exit_price".into(), json!(exit_price.to_string()));
        data.insert("profit".into(), json!(profit.to_string()));
        self.bus.publish(Event::with_source("tr.position.closed", data, "tr"), true).await;
    }

    async fn on_order_update(&self, event: &Event) {
        let order_id = event.get("order_id").and_then(Value::as_u64).unwrap_or(0);
        let status = event.get_str("status").unwrap_or("");
        tracing::debug!(order_id, status, "order status update");
    }

    async fn on_order_failed(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default();
        let symbol = event.get_str("symbol").unwrap_or_default();
        let error = event.get_str("error").unwrap_or_default();
        warn!(user_id, symbol, error, "order submission failed");
    }

    async fn on_order_cancelled(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default();
        let symbol = event.get_str("symbol").unwrap_or_default();
        info!(user_id, symbol, "order cancelled");
    }
}

macro_rules! handler {
    ($name:ident, $method:ident) => {
        struct $name {
            tr: Arc<TrManager>,
        }

        #[async_trait::async_trait]
        impl Handler for $name {
            fn name(&self) -> &str {
                stringify!($name)
            }

            async fn handle(&self, event: Event) -> anyhow::Result<()> {
                self.tr.$method(&event).await;
                Ok(())
            }
        }
    };
}

handler!(OnAccountLoaded, on_account_loaded);
handler!(OnAccountBalance, on_account_balance);
handler!(OnKlineUpdate, on_kline_update);
handler!(OnSignalGenerated, on_signal_generated);
handler!(OnGridCreate, on_grid_create);
handler!(OnOrderSubmitted, on_order_submitted);
handler!(OnOrderFilled, on_order_filled);
handler!(OnOrderUpdate, on_order_update);
handler!(OnOrderFailed, on_order_failed);
handler!(OnOrderCancelled, on_order_cancelled);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventStore;
    use crate::event::InMemoryEventStore;

    fn manager_with_config(contents: &str) -> (Arc<TrManager>, Arc<InMemoryEventStore>) {
        let dir = std::env::temp_dir().join(format!("nexus-perp-tr-test-{}", uuid::Uuid::new_v4()));
        let strat_dir = dir.join("strategies").join("u1");
        std::fs::create_dir_all(&strat_dir).unwrap();
        std::fs::write(strat_dir.join("ensemble.json"), contents).unwrap();

        let store = Arc::new(InMemoryEventStore::new(1000));
        let bus = Arc::new(EventBus::new(Some(store.clone())));
        (TrManager::new(bus, dir), store)
    }

    fn kline_event(user_id: &str, symbol: &str, close: f64) -> Event {
        let mut data = Map::new();
        data.insert("user_id".into(), json!(user_id));
        data.insert("symbol".into(), json!(symbol));
        data.insert(
            "kline".into(),
            json!({"open": close.to_string(), "high": close.to_string(), "low": close.to_string(), "close": close.to_string(), "volume": "1", "timestamp": 0, "is_closed": true}),
        );
        Event::with_source("de.kline.update", data, "de")
    }

    #[tokio::test]
    async fn scenario_5_no_grid_entry_and_exit_pnl() {
        let json = r#"{
            "timeframe": "5m",
            "leverage": 4,
            "trading_pairs": [{"symbol": "XRPUSDC", "indicator_params": {}}]
        }"#;
        let (tr, store) = manager_with_config(json);

        let mut loaded = Map::new();
        loaded.insert("user_id".into(), json!("u1"));
        loaded.insert("strategy_name".into(), json!("ensemble"));
        tr.on_account_loaded(&Event::with_source("pm.account.loaded", loaded, "pm")).await;

        let mut balance = Map::new();
        balance.insert("user_id".into(), json!("u1"));
        balance.insert("asset".into(), json!("USDT"));
        balance.insert("balance".into(), json!("10000"));
        balance.insert("available_balance".into(), json!("10000"));
        tr.on_account_balance(&Event::with_source("de.account.balance", balance, "de")).await;

        tr.on_kline_update(&kline_event("u1", "XRPUSDC", 1.00)).await;

        let mut signal = Map::new();
        signal.insert("user_id".into(), json!("u1"));
        signal.insert("symbol".into(), json!("XRPUSDC"));
        signal.insert("side".into(), json!("LONG"));
        signal.insert("action".into(), json!("OPEN"));
        tr.on_signal_generated(&Event::with_source("st.signal.generated", signal, "st")).await;

        let events = store.query_recent(10).await.unwrap();
        let create = events.iter().find(|e| e.subject == "trading.order.create").expect("market order emitted");
        assert_eq!(create.get_str("quantity"), Some("38000"));

        let mut submitted = Map::new();
        submitted.insert("user_id".into(), json!("u1"));
        submitted.insert("symbol".into(), json!("XRPUSDC"));
        submitted.insert("side".into(), json!("BUY"));
        submitted.insert("order_id".into(), json!(1001));
        tr.on_order_submitted(&Event::with_source("de.order.submitted", submitted, "de")).await;

        let mut filled = Map::new();
        filled.insert("user_id".into(), json!("u1"));
        filled.insert("symbol".into(), json!("XRPUSDC"));
        filled.insert("order_id".into(), json!(1001));
        filled.insert("price".into(), json!(1.00));
        filled.insert("quantity".into(), json!(38000));
        tr.on_order_filled(&Event::with_source("de.order.filled", filled, "de")).await;

        let events = store.query_recent(20).await.unwrap();
        assert!(events.iter().any(|e| e.subject == "tr.position.opened"));

        let mut close_signal = Map::new();
        close_signal.insert("user_id".into(), json!("u1"));
        close_signal.insert("symbol".into(), json!("XRPUSDC"));
        close_signal.insert("side".into(), json!("LONG"));
        close_signal.insert("action".into(), json!("CLOSE"));
        tr.on_signal_generated(&Event::with_source("st.signal.generated", close_signal, "st")).await;

        let mut submitted2 = Map::new();
        submitted2.insert("user_id".into(), json!("u1"));
        submitted2.insert("symbol".into(), json!("XRPUSDC"));
        submitted2.insert("side".into(), json!("SELL"));
        submitted2.insert("order_id".into(), json!(1002));
        tr.on_order_submitted(&Event::with_source("de.order.submitted", submitted2, "de")).await;

        let mut filled2 = Map::new();
        filled2.insert("user_id".into(), json!("u1"));
        filled2.insert("symbol".into(), json!("XRPUSDC"));
        filled2.insert("order_id".into(), json!(1002));
        filled2.insert("price".into(), json!(1.10));
        filled2.insert("quantity".into(), json!(38000));
        tr.on_order_filled(&Event::with_source("de.order.filled", filled2, "de")).await;

        let events = store.query_recent(30).await.unwrap();
        let closed = events.iter().find(|e| e.subject == "tr.position.closed").expect("position closed emitted");
        assert_eq!(closed.get_str("profit"), Some("3768.08"));
    }
}
