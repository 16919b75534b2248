// =============================================================================
// TA — Technical Analysis: indicator instances + per-symbol aggregation
// =============================================================================
//
// New top-level module; the teacher computes indicators inline inside its
// regime detector with no registry or per-stream bookkeeping. TA borrows the
// teacher's `CandleBuffer` ring-buffer idiom (`market_data::candle_buffer`)
// to maintain the small rolling kline window each indicator instance needs,
// since `de.kline.update` delivers one kline at a time and indicators expect
// a full window on every `calculate` call.
// =============================================================================

pub mod indicator;
pub mod indicators;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::Mutex as AsyncMutex;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::de::kline::Kline;
use crate::event::{Event, EventBus, Handler};
use indicator::{registry, Indicator, IndicatorConstructor};

const MAX_BUFFER: usize = 1500;

/// Floor for a historical-backfill request, regardless of how few klines an
/// indicator itself needs to warm up.
const DEFAULT_LIMIT: usize = 200;

/// Binance's hard cap on a single `klines` REST call.
const EXCHANGE_KLINE_LIMIT: usize = 1500;

struct IndicatorEntry {
    user_id: String,
    symbol: String,
    interval: String,
    indicator_name: String,
    indicator: AsyncMutex<Box<dyn Indicator>>,
}

struct AggregatorEntry {
    timeframe: String,
    results: HashMap<String, Value>,
}

/// Singleton TA manager. Owns every live indicator instance and the
/// per-(user, symbol, interval) aggregation state.
pub struct TaManager {
    bus: Arc<EventBus>,
    indicators: RwLock<HashMap<String, Arc<IndicatorEntry>>>,
    buffers: RwLock<HashMap<String, VecDeque<Kline>>>,
    aggregator: RwLock<HashMap<String, AggregatorEntry>>,
    registry: HashMap<&'static str, IndicatorConstructor>,
}

impl TaManager {
    pub fn new(bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self {
            bus,
            indicators: RwLock::new(HashMap::new()),
            buffers: RwLock::new(HashMap::new()),
            aggregator: RwLock::new(HashMap::new()),
            registry: registry(),
        })
    }

    pub fn register_handlers(self: &Arc<Self>) {
        self.bus.subscribe("st.indicator.subscribe", Arc::new(OnIndicatorSubscribe { ta: self.clone() }));
        self.bus.subscribe("de.historical_klines.success", Arc::new(OnHistoricalSuccess { ta: self.clone() }));
        self.bus.subscribe("de.historical_klines.failed", Arc::new(OnHistoricalFailed { ta: self.clone() }));
        self.bus.subscribe("de.kline.update", Arc::new(OnKlineUpdate { ta: self.clone() }));
    }

    fn stream_key(user_id: &str, symbol: &str, interval: &str) -> String {
        format!("{user_id}_{symbol}_{interval}")
    }

    fn indicator_key(user_id: &str, symbol: &str, interval: &str, indicator_name: &str) -> String {
        format!("{user_id}_{symbol}_{interval}_{indicator_name}")
    }

    async fn on_indicator_subscribe(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default().to_string();
        let symbol = event.get_str("symbol").unwrap_or_default().to_string();
        let indicator_name = event.get_str("indicator_name").unwrap_or_default().to_string();
        let timeframe = event.get_str("timeframe").unwrap_or("1m").to_string();
        let params = event.get("indicator_params").cloned().unwrap_or(Value::Object(Map::new()));

        let Some(constructor) = self.registry.get(indicator_name.as_str()) else {
            warn!(indicator_name, "unknown indicator requested");
            let mut data = Map::new();
            data.insert("user_id".into(), json!(user_id));
            data.insert("symbol".into(), json!(symbol));
            data.insert("indicator_name".into(), json!(indicator_name));
            data.insert("error".into(), json!("unknown indicator"));
            self.bus
                .publish(Event::with_source("ta.indicator.create_failed", data, "ta"), true)
                .await;
            return;
        };

        let instance = constructor(&params);
        let min_required = instance.min_klines_required();

        let key = Self::indicator_key(&user_id, &symbol, &timeframe, &indicator_name);
        let entry = Arc::new(IndicatorEntry {
            user_id: user_id.clone(),
            symbol: symbol.clone(),
            interval: timeframe.clone(),
            indicator_name: indicator_name.clone(),
            indicator: AsyncMutex::new(instance),
        });
        self.indicators.write().insert(key, entry);

        let mut hist_data = Map::new();
        hist_data.insert("user_id".into(), json!(user_id));
        hist_data.insert("symbol".into(), json!(symbol));
        hist_data.insert("interval".into(), json!(timeframe));
        let limit = min_required.max(DEFAULT_LIMIT).min(EXCHANGE_KLINE_LIMIT);
        hist_data.insert("limit".into(), json!(limit));
        self.bus
            .publish(Event::with_source("de.get_historical_klines", hist_data, "ta"), true)
            .await;

        let mut sub_data = Map::new();
        sub_data.insert("user_id".into(), json!(user_id));
        sub_data.insert("symbol".into(), json!(symbol));
        sub_data.insert("interval".into(), json!(timeframe));
        self.bus
            .publish(Event::with_source("de.kline.subscribe", sub_data, "ta"), true)
            .await;

        info!(user_id, symbol, indicator_name, timeframe, "indicator instance created");
        let mut created_data = Map::new();
        created_data.insert("user_id".into(), json!(user_id));
        created_data.insert("symbol".into(), json!(symbol));
        created_data.insert("indicator_name".into(), json!(indicator_name));
        created_data.insert("timeframe".into(), json!(timeframe));
        self.bus
            .publish(Event::with_source("ta.indicator.created", created_data, "ta"), true)
            .await;
    }

    async fn on_historical_success(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default().to_string();
        let symbol = event.get_str("symbol").unwrap_or_default().to_string();
        let interval = event.get_str("interval").unwrap_or_default().to_string();
        let klines: Vec<Kline> = event
            .get("klines")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Kline::from_json).collect())
            .unwrap_or_default();

        let buf_key = Self::stream_key(&user_id, &symbol, &interval);
        {
            let mut buffers = self.buffers.write();
            let buf: VecDeque<Kline> = klines.into_iter().collect();
            buffers.insert(buf_key, buf);
        }

        let matching = self.matching_entries(&user_id, &symbol, &interval);
        let buffer_snapshot = self.buffer_snapshot(&user_id, &symbol, &interval);
        for entry in matching {
            let mut ind = entry.indicator.lock().await;
            ind.initialize(&buffer_snapshot);
        }
    }

    async fn on_historical_failed(&self, event: &Event) {
        warn!(
            user_id = event.get_str("user_id").unwrap_or_default(),
            symbol = event.get_str("symbol").unwrap_or_default(),
            error = event.get_str("error").unwrap_or_default(),
            "historical klines fetch failed — indicators for this stream remain un-initialised"
        );
    }

    async fn on_kline_update(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default().to_string();
        let symbol = event.get_str("symbol").unwrap_or_default().to_string();
        let interval = event.get_str("interval").unwrap_or_default().to_string();
        let Some(kline) = event.get("kline").and_then(Kline::from_json) else {
            return;
        };

        let is_closed = kline.is_closed;
        self.push_kline(&user_id, &symbol, &interval, kline);
        if !is_closed {
            return;
        }
        let buffer_snapshot = self.buffer_snapshot(&user_id, &symbol, &interval);

        let matching = self.matching_entries(&user_id, &symbol, &interval);
        let expected_count = matching.len();
        if expected_count == 0 {
            return;
        }

        for entry in &matching {
            let mut ind = entry.indicator.lock().await;
            if !ind.is_ready() {
                continue;
            }
            let result = ind.calculate(&buffer_snapshot);
            drop(ind);
            self.record_and_maybe_flush(&user_id, &symbol, &interval, &entry.indicator_name, result, expected_count)
                .await;
        }
    }

    fn push_kline(&self, user_id: &str, symbol: &str, interval: &str, kline: Kline) {
        let key = Self::stream_key(user_id, symbol, interval);
        let mut buffers = self.buffers.write();
        let buf = buffers.entry(key).or_insert_with(VecDeque::new);
        match buf.back() {
            Some(last) if last.timestamp == kline.timestamp => {
                *buf.back_mut().unwrap() = kline;
            }
            _ => {
                buf.push_back(kline);
                while buf.len() > MAX_BUFFER {
                    buf.pop_front();
                }
            }
        }
    }

    fn buffer_snapshot(&self, user_id: &str, symbol: &str, interval: &str) -> Vec<Kline> {
        let key = Self::stream_key(user_id, symbol, interval);
        self.buffers.read().get(&key).map(|b| b.iter().cloned().collect()).unwrap_or_default()
    }

    fn matching_entries(&self, user_id: &str, symbol: &str, interval: &str) -> Vec<Arc<IndicatorEntry>> {
        self.indicators
            .read()
            .values()
            .filter(|e| e.user_id == user_id && e.symbol == symbol && e.interval == interval)
            .cloned()
            .collect()
    }

    async fn record_and_maybe_flush(
        &self,
        user_id: &str,
        symbol: &str,
        interval: &str,
        indicator_name: &str,
        result: indicator::IndicatorResult,
        expected_count: usize,
    ) {
        let agg_key = format!("{user_id}_{symbol}");
        let ready_to_flush = {
            let mut agg = self.aggregator.write();
            let entry = agg.entry(agg_key.clone()).or_insert_with(|| AggregatorEntry {
                timeframe: interval.to_string(),
                results: HashMap::new(),
            });
            entry.results.insert(indicator_name.to_string(), json!({"signal": result.signal, "data": result.data}));
            entry.results.len() >= expected_count
        };

        if ready_to_flush {
            let entry = self.aggregator.write().remove(&agg_key);
            if let Some(entry) = entry {
                let mut data = Map::new();
                data.insert("user_id".into(), json!(user_id));
                data.insert("symbol".into(), json!(symbol));
                data.insert("timeframe".into(), json!(entry.timeframe));
                data.insert("indicators".into(), json!(entry.results));
                self.bus
                    .publish(Event::with_source("ta.calculation.completed", data, "ta"), true)
                    .await;
            }
        }
    }
}

macro_rules! handler {
    ($name:ident, $method:ident) => {
        struct $name {
            ta: Arc<TaManager>,
        }

        #[async_trait::async_trait]
        impl Handler for $name {
            fn name(&self) -> &str {
                stringify!($name)
            }

            async fn handle(&self, event: Event) -> anyhow::Result<()> {
                self.ta.$method(&event).await;
                Ok(())
            }
        }
    };
}

handler!(OnIndicatorSubscribe, on_indicator_subscribe);
handler!(OnHistoricalSuccess, on_historical_success);
handler!(OnHistoricalFailed, on_historical_failed);
handler!(OnKlineUpdate, on_kline_update);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventStore;
    use crate::event::InMemoryEventStore;

    fn kline_json(close: f64, ts: i64, closed: bool) -> Value {
        json!({"open": "1", "high": "1", "low": "1", "close": close.to_string(), "volume": "1", "timestamp": ts, "is_closed": closed})
    }

    #[tokio::test]
    async fn subscribe_with_unknown_indicator_emits_create_failed() {
        let store = Arc::new(InMemoryEventStore::new(100));
        let bus = Arc::new(EventBus::new(Some(store.clone())));
        let ta = TaManager::new(bus);

        let mut data = Map::new();
        data.insert("user_id".into(), json!("u1"));
        data.insert("symbol".into(), json!("BTCUSDT"));
        data.insert("indicator_name".into(), json!("does_not_exist"));
        data.insert("timeframe".into(), json!("1m"));
        ta.on_indicator_subscribe(&Event::with_source("st.indicator.subscribe", data, "st")).await;

        let events = store.query_recent(10).await.unwrap();
        assert!(events.iter().any(|e| e.subject == "ta.indicator.create_failed"));
    }

    #[tokio::test]
    async fn full_cycle_emits_calculation_completed_once_all_indicators_ready() {
        let store = Arc::new(InMemoryEventStore::new(1000));
        let bus = Arc::new(EventBus::new(Some(store.clone())));
        let ta = TaManager::new(bus);

        for name in ["roc", "ma_stop"] {
            let mut data = Map::new();
            data.insert("user_id".into(), json!("u1"));
            data.insert("symbol".into(), json!("BTCUSDT"));
            data.insert("indicator_name".into(), json!(name));
            data.insert("timeframe".into(), json!("1m"));
            data.insert("indicator_params".into(), json!({}));
            ta.on_indicator_subscribe(&Event::with_source("st.indicator.subscribe", data, "st")).await;
        }

        let klines: Vec<Value> = (0..60).map(|i| kline_json(100.0 + i as f64, i as i64 * 60_000, true)).collect();
        let mut hist_data = Map::new();
        hist_data.insert("user_id".into(), json!("u1"));
        hist_data.insert("symbol".into(), json!("BTCUSDT"));
        hist_data.insert("interval".into(), json!("1m"));
        hist_data.insert("klines".into(), json!(klines));
        ta.on_historical_success(&Event::with_source("de.historical_klines.success", hist_data, "de")).await;

        let mut tick_data = Map::new();
        tick_data.insert("user_id".into(), json!("u1"));
        tick_data.insert("symbol".into(), json!("BTCUSDT"));
        tick_data.insert("interval".into(), json!("1m"));
        tick_data.insert("kline".into(), kline_json(161.0, 60 * 60_000, true));
        ta.on_kline_update(&Event::with_source("de.kline.update", tick_data, "de")).await;

        let events = store.query_recent(10).await.unwrap();
        assert!(events.iter().any(|e| e.subject == "ta.calculation.completed"));
    }
}
