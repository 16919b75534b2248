// =============================================================================
// ST — Strategy: per-account strategy configuration and signal generation
// =============================================================================
//
// New top-level module; the teacher has one hardcoded `StrategyEngine` wired
// directly into `main.rs`'s loop. ST generalises that into a per-account,
// per-symbol config load (grounded in PM's `#[serde(default)]` +
// mandatory-field-validation idiom from `pm::load`) plus a pluggable
// `Strategy` trait, with `ensemble` as the one concrete built-in — a
// from-scratch but teacher-styled reimplementation of the weighted-vote
// idiom visible in `strategy.rs`'s `StrategyEngine::evaluate_symbol`.
// =============================================================================

pub mod ensemble;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::event::{Event, EventBus, Handler};
use crate::types::{Action, Side};
use ensemble::EnsembleStrategy;

#[derive(Debug, Clone, Deserialize)]
pub struct TradingPairConfig {
    pub symbol: String,
    #[serde(default)]
    pub indicator_params: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GridTradingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_grid_type")]
    pub grid_type: String,
    #[serde(default = "default_grid_ratio")]
    pub ratio: f64,
    #[serde(default = "default_grid_levels")]
    pub grid_levels: u32,
    #[serde(default = "default_move_pct")]
    pub move_up: f64,
    #[serde(default = "default_move_pct")]
    pub move_down: f64,
}

fn default_grid_type() -> String {
    "symmetric".to_string()
}
fn default_grid_ratio() -> f64 {
    0.5
}
fn default_grid_levels() -> u32 {
    10
}
fn default_move_pct() -> f64 {
    5.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default = "default_margin_mode")]
    pub margin_mode: String,
    #[serde(default = "default_margin_type")]
    pub margin_type: String,
    pub trading_pairs: Vec<TradingPairConfig>,
    #[serde(default)]
    pub reverse: bool,
    #[serde(default = "default_vote_threshold")]
    pub vote_threshold: f64,
    pub grid_trading: Option<GridTradingConfig>,
}

fn default_timeframe() -> String {
    "5m".to_string()
}
fn default_leverage() -> u32 {
    5
}
fn default_margin_mode() -> String {
    "ISOLATED".to_string()
}
fn default_margin_type() -> String {
    "CROSS".to_string()
}
fn default_vote_threshold() -> f64 {
    0.5
}

impl StrategyConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read strategy config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse strategy config from {}", path.display()))?;
        if config.trading_pairs.is_empty() {
            anyhow::bail!("strategy config at {} has no trading_pairs", path.display());
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PositionState {
    None,
    Open(SideMark),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SideMark {
    Long,
    Short,
}

impl From<Side> for SideMark {
    fn from(s: Side) -> Self {
        match s {
            Side::Long => SideMark::Long,
            Side::Short => SideMark::Short,
        }
    }
}

/// Singleton strategy manager: one `StrategyConfig` + `EnsembleStrategy` per
/// account, one `PositionState` per `(user_id, symbol)`.
pub struct StManager {
    bus: Arc<EventBus>,
    config_dir: PathBuf,
    configs: RwLock<HashMap<String, Arc<StrategyConfig>>>,
    positions: RwLock<HashMap<(String, String), PositionState>>,
}

impl StManager {
    pub fn new(bus: Arc<EventBus>, config_dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            bus,
            config_dir: config_dir.into(),
            configs: RwLock::new(HashMap::new()),
            positions: RwLock::new(HashMap::new()),
        })
    }

    pub fn register_handlers(self: &Arc<Self>) {
        self.bus.subscribe("pm.account.loaded", Arc::new(OnAccountLoaded { st: self.clone() }));
        self.bus.subscribe("ta.calculation.completed", Arc::new(OnCalculationCompleted { st: self.clone() }));
        self.bus.subscribe("tr.position.opened", Arc::new(OnPositionOpened { st: self.clone() }));
        self.bus.subscribe("tr.position.closed", Arc::new(OnPositionClosed { st: self.clone() }));
    }

    fn strategy_path(&self, user_id: &str, strategy_name: &str) -> PathBuf {
        self.config_dir.join("strategies").join(user_id).join(format!("{strategy_name}.json"))
    }

    async fn on_account_loaded(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default().to_string();
        let strategy_name = event.get_str("strategy_name").unwrap_or_default().to_string();
        let path = self.strategy_path(&user_id, &strategy_name);

        let config = match StrategyConfig::load(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(user_id, strategy_name, error = %e, "strategy config load failed");
                let mut data = Map::new();
                data.insert("user_id".into(), json!(user_id));
                data.insert("strategy_name".into(), json!(strategy_name));
                data.insert("error".into(), json!(e.to_string()));
                self.bus.publish(Event::with_source("st.config.load_failed", data, "st"), true).await;
                return;
            }
        };
        let config = Arc::new(config);
        self.configs.write().insert(user_id.clone(), config.clone());

        for pair in &config.trading_pairs {
            self.positions.write().insert((user_id.clone(), pair.symbol.clone()), PositionState::None);

            for (indicator_name, params) in &pair.indicator_params {
                let mut data = Map::new();
                data.insert("user_id".into(), json!(user_id));
                data.insert("symbol".into(), json!(pair.symbol));
                data.insert("indicator_name".into(), json!(indicator_name));
                data.insert("indicator_params".into(), params.clone());
                data.insert("timeframe".into(), json!(config.timeframe));
                self.bus.publish(Event::with_source("st.indicator.subscribe", data, "st"), true).await;
            }
        }

        info!(user_id, strategy_name, pairs = config.trading_pairs.len(), "strategy config loaded");
        let mut ready_data = Map::new();
        ready_data.insert("user_id".into(), json!(user_id));
        ready_data.insert("strategy_name".into(), json!(strategy_name));
        self.bus.publish(Event::with_source("st.strategy.ready", ready_data, "st"), true).await;
    }

    async fn on_calculation_completed(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default().to_string();
        let symbol = event.get_str("symbol").unwrap_or_default().to_string();
        let Some(indicators) = event.get("indicators").and_then(Value::as_object) else {
            return;
        };

        let Some(config) = self.configs.read().get(&user_id).cloned() else {
            return;
        };
        let Some(pair) = config.trading_pairs.iter().find(|p| p.symbol == symbol) else {
            return;
        };

        let weights: HashMap<String, f64> = pair
            .indicator_params
            .iter()
            .filter_map(|(name, params)| params.get("weight").and_then(Value::as_f64).map(|w| (name.clone(), w)))
            .collect();
        let strategy = EnsembleStrategy::new(weights, config.vote_threshold);
        let Some(side) = strategy.on_indicators_completed(indicators) else {
            return;
        };

        let current = self
            .positions
            .read()
            .get(&(user_id.clone(), symbol.clone()))
            .copied()
            .unwrap_or(PositionState::None);

        let action = match current {
            PositionState::None => Some(Action::Open),
            PositionState::Open(existing) if existing != SideMark::from(side) => Some(Action::Close),
            PositionState::Open(_) => None,
        };

        let Some(action) = action else { return };

        let mut data = Map::new();
        data.insert("user_id".into(), json!(user_id));
        data.insert("symbol".into(), json!(symbol));
        data.insert("side".into(), json!(side.to_string()));
        data.insert("action".into(), json!(action.to_string()));
        data.insert("timeframe".into(), json!(config.timeframe));
        data.insert("leverage".into(), json!(config.leverage));
        self.bus.publish(Event::with_source("st.signal.generated", data, "st"), true).await;
    }

    async fn on_position_opened(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default().to_string();
        let symbol = event.get_str("symbol").unwrap_or_default().to_string();
        let side_str = event.get_str("side").unwrap_or("LONG");
        let side = if side_str == "SHORT" { Side::Short } else { Side::Long };

        self.positions.write().insert((user_id.clone(), symbol.clone()), PositionState::Open(side.into()));

        let Some(config) = self.configs.read().get(&user_id).cloned() else {
            return;
        };
        let Some(grid) = config.grid_trading.as_ref().filter(|g| g.enabled) else {
            return;
        };
        let Some(entry_price) = event.get_str("entry_price").and_then(|s| s.parse::<f64>().ok()) else {
            return;
        };

        let mut data = Map::new();
        data.insert("user_id".into(), json!(user_id));
        data.insert("symbol".into(), json!(symbol));
        data.insert("side".into(), json!(side.to_string()));
        data.insert("entry_price".into(), json!(entry_price.to_string()));
        data.insert("grid_type".into(), json!(grid.grid_type));
        data.insert("grid_levels".into(), json!(grid.grid_levels));
        data.insert("grid_ratio".into(), json!(grid.ratio));
        data.insert("move_up".into(), json!(grid.move_up));
        data.insert("move_down".into(), json!(grid.move_down));
        self.bus.publish(Event::with_source("st.grid.create", data, "st"), true).await;
    }

    async fn on_position_closed(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default().to_string();
        let symbol = event.get_str("symbol").unwrap_or_default().to_string();
        let side_str = event.get_str("side").unwrap_or("LONG");
        let side = if side_str == "SHORT" { Side::Short } else { Side::Long };

        self.positions.write().insert((user_id.clone(), symbol.clone()), PositionState::None);

        let Some(config) = self.configs.read().get(&user_id).cloned() else {
            return;
        };
        if !config.reverse {
            return;
        }

        let mut data = Map::new();
        data.insert("user_id".into(), json!(user_id));
        data.insert("symbol".into(), json!(symbol));
        data.insert("side".into(), json!(side.opposite().to_string()));
        data.insert("action".into(), json!(Action::Open.to_string()));
        data.insert("timeframe".into(), json!(config.timeframe));
        data.insert("leverage".into(), json!(config.leverage));
        self.bus.publish(Event::with_source("st.signal.generated", data, "st"), true).await;
    }
}

macro_rules! handler {
    ($name:ident, $method:ident) => {
        struct $name {
            st: Arc<StManager>,
        }

        #[async_trait::async_trait]
        impl Handler for $name {
            fn name(&self) -> &str {
                stringify!($name)
            }

            async fn handle(&self, event: Event) -> anyhow::Result<()> {
                self.st.$method(&event).await;
                Ok(())
            }
        }
    };
}

handler!(OnAccountLoaded, on_account_loaded);
handler!(OnCalculationCompleted, on_calculation_completed);
handler!(OnPositionOpened, on_position_opened);
handler!(OnPositionClosed, on_position_closed);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventStore;
    use crate::event::InMemoryEventStore;

    fn manager_with_config(contents: &str) -> (Arc<StManager>, Arc<InMemoryEventStore>, PathBuf) {
        let dir = std::env::temp_dir().join(format!("nexus-perp-st-test-{}", uuid::Uuid::new_v4()));
        let strat_dir = dir.join("strategies").join("u1");
        std::fs::create_dir_all(&strat_dir).unwrap();
        std::fs::write(strat_dir.join("ensemble.json"), contents).unwrap();

        let store = Arc::new(InMemoryEventStore::new(1000));
        let bus = Arc::new(EventBus::new(Some(store.clone())));
        (StManager::new(bus, dir.clone()), store, dir)
    }

    #[tokio::test]
    async fn account_loaded_subscribes_indicators_for_each_pair() {
        let json = r#"{
            "timeframe": "5m",
            "trading_pairs": [
                {"symbol": "BTCUSDT", "indicator_params": {"rsi": {"period": 14}}}
            ]
        }"#;
        let (st, store, _dir) = manager_with_config(json);

        let mut data = Map::new();
        data.insert("user_id".into(), json!("u1"));
        data.insert("strategy_name".into(), json!("ensemble"));
        st.on_account_loaded(&Event::with_source("pm.account.loaded", data, "pm")).await;

        let events = store.query_recent(10).await.unwrap();
        assert!(events.iter().any(|e| e.subject == "st.indicator.subscribe"));
        assert!(events.iter().any(|e| e.subject == "st.strategy.ready"));
    }

    #[tokio::test]
    async fn missing_config_emits_load_failed() {
        let dir = std::env::temp_dir().join(format!("nexus-perp-st-missing-{}", uuid::Uuid::new_v4()));
        let store = Arc::new(InMemoryEventStore::new(100));
        let bus = Arc::new(EventBus::new(Some(store.clone())));
        let st = StManager::new(bus, dir);

        let mut data = Map::new();
        data.insert("user_id".into(), json!("u1"));
        data.insert("strategy_name".into(), json!("does_not_exist"));
        st.on_account_loaded(&Event::with_source("pm.account.loaded", data, "pm")).await;

        let events = store.query_recent(10).await.unwrap();
        assert!(events.iter().any(|e| e.subject == "st.config.load_failed"));
    }

    #[tokio::test]
    async fn calculation_completed_with_no_position_emits_open_signal() {
        let json = r#"{
            "timeframe": "5m",
            "trading_pairs": [
                {"symbol": "BTCUSDT", "indicator_params": {"rsi": {}}}
            ]
        }"#;
        let (st, store, _dir) = manager_with_config(json);

        let mut loaded = Map::new();
        loaded.insert("user_id".into(), json!("u1"));
        loaded.insert("strategy_name".into(), json!("ensemble"));
        st.on_account_loaded(&Event::with_source("pm.account.loaded", loaded, "pm")).await;

        let mut calc = Map::new();
        calc.insert("user_id".into(), json!("u1"));
        calc.insert("symbol".into(), json!("BTCUSDT"));
        calc.insert("timeframe".into(), json!("5m"));
        calc.insert("indicators".into(), json!({"rsi": {"signal": "LONG", "data": {}}}));
        st.on_calculation_completed(&Event::with_source("ta.calculation.completed", calc, "ta")).await;

        let events = store.query_recent(10).await.unwrap();
        let signal = events.iter().find(|e| e.subject == "st.signal.generated").expect("signal emitted");
        assert_eq!(signal.get_str("side"), Some("LONG"));
        assert_eq!(signal.get_str("action"), Some("OPEN"));
    }

    #[tokio::test]
    async fn reverse_enabled_reopens_opposite_side_on_close() {
        let json = r#"{
            "timeframe": "5m",
            "reverse": true,
            "trading_pairs": [{"symbol": "BTCUSDT", "indicator_params": {}}]
        }"#;
        let (st, store, _dir) = manager_with_config(json);

        let mut loaded = Map::new();
        loaded.insert("user_id".into(), json!("u1"));
        loaded.insert("strategy_name".into(), json!("ensemble"));
        st.on_account_loaded(&Event::with_source("pm.account.loaded", loaded, "pm")).await;

        let mut closed = Map::new();
        closed.insert("user_id".into(), json!("u1"));
        closed.insert("symbol".into(), json!("BTCUSDT"));
        closed.insert("side".into(), json!("LONG"));
        st.on_position_closed(&Event::with_source("tr.position.closed", closed, "tr")).await;

        let events = store.query_recent(10).await.unwrap();
        let signal = events.iter().find(|e| e.subject == "st.signal.generated").expect("reverse signal emitted");
        assert_eq!(signal.get_str("side"), Some("SHORT"));
        assert_eq!(signal.get_str("action"), Some("OPEN"));
    }
}
