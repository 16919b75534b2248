// =============================================================================
// DE — Data Engine: per-account exchange connectivity
// =============================================================================
//
// Directly modeled on the teacher's `AppState.trade_processors:
// RwLock<HashMap<String, Arc<TradeStreamProcessor>>>` — one entry per
// account, constructed lazily as accounts come online and torn down on
// shutdown. The teacher wires one global stream; here every account gets
// its own `FuturesClient` + `MarketStream` + `UserDataStream` trio.
// =============================================================================

pub mod client;
pub mod kline;
pub mod market_stream;
pub mod rate_limit;
pub mod user_stream;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde_json::{json, Map};
use tracing::{info, warn};

use crate::event::{Event, EventBus, Handler};
use client::FuturesClient;
use kline::Kline;
use market_stream::MarketStream;
use user_stream::UserDataStream;

struct AccountHandle {
    client: Arc<FuturesClient>,
    market_stream: Arc<MarketStream>,
    user_stream: Arc<UserDataStream>,
}

/// Singleton data-engine manager. Owns one exchange connection bundle per
/// account and answers order/balance/history requests routed over the bus.
pub struct DeManager {
    bus: Arc<EventBus>,
    accounts: RwLock<HashMap<String, AccountHandle>>,
    max_retries: u32,
    reconnect_delay: Duration,
    keepalive_interval: Duration,
}

impl DeManager {
    pub fn new(bus: Arc<EventBus>, max_retries: u32, reconnect_delay: Duration, keepalive_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            bus,
            accounts: RwLock::new(HashMap::new()),
            max_retries,
            reconnect_delay,
            keepalive_interval,
        })
    }

    pub fn register_handlers(self: &Arc<Self>) {
        self.bus.subscribe("pm.account.loaded", Arc::new(OnAccountLoaded { de: self.clone() }));
        self.bus.subscribe("trading.order.create", Arc::new(OnOrderCreate { de: self.clone() }));
        self.bus.subscribe("trading.order.cancel", Arc::new(OnOrderCancel { de: self.clone() }));
        self.bus.subscribe("trading.get_account_balance", Arc::new(OnGetBalance { de: self.clone() }));
        self.bus.subscribe("de.get_historical_klines", Arc::new(OnGetHistoricalKlines { de: self.clone() }));
        self.bus.subscribe("de.kline.subscribe", Arc::new(OnKlineSubscribe { de: self.clone() }));
    }

    fn client_for(&self, user_id: &str) -> Option<Arc<FuturesClient>> {
        self.accounts.read().get(user_id).map(|h| h.client.clone())
    }

    pub fn market_stream_for(&self, user_id: &str) -> Option<Arc<MarketStream>> {
        self.accounts.read().get(user_id).map(|h| h.market_stream.clone())
    }

    async fn on_account_loaded(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default().to_string();
        let api_key = event.get_str("api_key").unwrap_or_default().to_string();
        let api_secret = event.get_str("api_secret").unwrap_or_default().to_string();

        if user_id.is_empty() || api_key.is_empty() || api_secret.is_empty() {
            let mut data = Map::new();
            data.insert("user_id".into(), json!(user_id));
            data.insert("error_type".into(), json!("missing_fields"));
            data.insert("error_message".into(), json!("user_id, api_key, or api_secret is empty"));
            self.bus
                .publish(Event::with_source("de.client.connection_failed", data, "de"), true)
                .await;
            return;
        }

        let client = Arc::new(FuturesClient::new(api_key, api_secret, self.max_retries));
        let market_stream = Arc::new(MarketStream::new(user_id.clone(), self.bus.clone(), self.reconnect_delay));
        let user_stream = Arc::new(UserDataStream::new(
            user_id.clone(),
            client.clone(),
            self.bus.clone(),
            self.keepalive_interval,
            self.reconnect_delay,
        ));

        tokio::spawn(market_stream.clone().run());
        tokio::spawn(user_stream.clone().run());

        self.accounts.write().insert(
            user_id.clone(),
            AccountHandle { client, market_stream, user_stream },
        );

        info!(user_id = %user_id, "exchange client connected");
        let mut data = Map::new();
        data.insert("user_id".into(), json!(user_id));
        data.insert("timestamp".into(), json!(chrono::Utc::now().to_rfc3339()));
        self.bus
            .publish(Event::with_source("de.client.connected", data, "de"), true)
            .await;
    }

    async fn on_get_historical_klines(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default().to_string();
        let symbol = event.get_str("symbol").unwrap_or_default().to_string();
        let interval = event.get_str("interval").unwrap_or_default().to_string();
        let limit = event.get("limit").and_then(|v| v.as_u64()).unwrap_or(200) as u32;

        let Some(client) = self.client_for(&user_id) else {
            self.emit_historical_failed(&user_id, &symbol, &interval, "no exchange client for account").await;
            return;
        };

        match client.get_historical_klines(&symbol, &interval, limit).await {
            Ok(klines) => {
                let mut data = Map::new();
                data.insert("user_id".into(), json!(user_id));
                data.insert("symbol".into(), json!(symbol));
                data.insert("interval".into(), json!(interval));
                data.insert("klines".into(), json!(klines.iter().map(Kline::to_json).collect::<Vec<_>>()));
                self.bus
                    .publish(Event::with_source("de.historical_klines.success", data, "de"), true)
                    .await;
            }
            Err(e) => {
                self.emit_historical_failed(&user_id, &symbol, &interval, &e.to_string()).await;
            }
        }
    }

    /// Turn an indicator subscription into a live kline stream. Idempotent —
    /// `MarketStream::subscribe_kline` no-ops if the pair is already tracked.
    async fn on_kline_subscribe(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default().to_string();
        let symbol = event.get_str("symbol").unwrap_or_default().to_string();
        let interval = event.get_str("interval").unwrap_or_default().to_string();

        let Some(market_stream) = self.market_stream_for(&user_id) else {
            warn!(user_id, symbol, interval, "kline subscribe request for unknown account — ignoring");
            return;
        };
        market_stream.subscribe_kline(&symbol, &interval);
    }

    async fn emit_historical_failed(&self, user_id: &str, symbol: &str, interval: &str, error: &str) {
        warn!(user_id, symbol, interval, error, "historical klines request failed");
        let mut data = Map::new();
        data.insert("user_id".into(), json!(user_id));
        data.insert("symbol".into(), json!(symbol));
        data.insert("interval".into(), json!(interval));
        data.insert("error".into(), json!(error));
        self.bus
            .publish(Event::with_source("de.historical_klines.failed", data, "de"), true)
            .await;
    }

    async fn on_order_create(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default().to_string();
        let symbol = event.get_str("symbol").unwrap_or_default().to_string();
        let side = event.get_str("side").unwrap_or_default().to_string();
        let order_type = event.get_str("order_type").unwrap_or("MARKET").to_string();
        let quantity: Decimal = event
            .get_str("quantity")
            .and_then(|s| s.parse().ok())
            .or_else(|| event.get("quantity").and_then(|v| v.as_f64()).and_then(|f| Decimal::try_from(f).ok()))
            .unwrap_or_default();
        let price: Option<Decimal> = event
            .get_str("price")
            .and_then(|s| s.parse().ok())
            .or_else(|| event.get("price").and_then(|v| v.as_f64()).and_then(|f| Decimal::try_from(f).ok()));
        let reduce_only = event.get("reduce_only").and_then(|v| v.as_bool());
        let client_order_id = event.get_str("client_order_id");

        let Some(client) = self.client_for(&user_id) else {
            self.emit_order_failed(&user_id, &symbol, "no exchange client for account").await;
            return;
        };

        match client
            .place_order(&symbol, &side, &order_type, quantity, price, None, reduce_only, client_order_id)
            .await
        {
            Ok(body) => {
                let order_id = body.get("orderId").cloned().unwrap_or(json!(null));
                let mut data = Map::new();
                data.insert("user_id".into(), json!(user_id));
                data.insert("order_id".into(), order_id);
                data.insert("symbol".into(), json!(symbol));
                data.insert("side".into(), json!(side));
                data.insert("type".into(), json!(order_type));
                data.insert("quantity".into(), json!(quantity.to_string()));
                if let Some(p) = price {
                    data.insert("price".into(), json!(p.to_string()));
                }
                self.bus
                    .publish(Event::with_source("de.order.submitted", data, "de"), true)
                    .await;
            }
            Err(e) => self.emit_order_failed(&user_id, &symbol, &e.to_string()).await,
        }
    }

    async fn emit_order_failed(&self, user_id: &str, symbol: &str, error: &str) {
        warn!(user_id, symbol, error, "order placement failed");
        let mut data = Map::new();
        data.insert("user_id".into(), json!(user_id));
        data.insert("symbol".into(), json!(symbol));
        data.insert("error".into(), json!(error));
        data.insert("retry_count".into(), json!(0));
        self.bus.publish(Event::with_source("de.order.failed", data, "de"), true).await;
    }

    async fn on_order_cancel(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default().to_string();
        let symbol = event.get_str("symbol").unwrap_or_default().to_string();
        let order_id = event.get("order_id").and_then(|v| v.as_u64());
        let client_order_id = event.get_str("client_order_id");

        let Some(client) = self.client_for(&user_id) else {
            self.emit_order_failed(&user_id, &symbol, "no exchange client for account").await;
            return;
        };

        match client.cancel_order(&symbol, order_id, client_order_id).await {
            Ok(_) => {
                let mut data = Map::new();
                data.insert("user_id".into(), json!(user_id));
                data.insert("symbol".into(), json!(symbol));
                if let Some(id) = order_id {
                    data.insert("order_id".into(), json!(id));
                }
                self.bus
                    .publish(Event::with_source("de.order.cancelled", data, "de"), true)
                    .await;
            }
            Err(e) => self.emit_order_failed(&user_id, &symbol, &e.to_string()).await,
        }
    }

    async fn on_get_balance(&self, event: &Event) {
        let user_id = event.get_str("user_id").unwrap_or_default().to_string();
        let asset = event.get_str("asset").unwrap_or("USDT").to_string();

        let Some(client) = self.client_for(&user_id) else {
            warn!(user_id, "balance request for unknown account — ignoring");
            return;
        };

        match client.get_account_balance(&asset).await {
            Ok((balance, available)) => {
                let mut data = Map::new();
                data.insert("user_id".into(), json!(user_id));
                data.insert("asset".into(), json!(asset));
                data.insert("balance".into(), json!(balance.to_string()));
                data.insert("available_balance".into(), json!(available.to_string()));
                self.bus
                    .publish(Event::with_source("de.account.balance", data, "de"), true)
                    .await;
            }
            Err(e) => warn!(user_id, asset, error = %e, "balance request failed"),
        }
    }

    pub fn shutdown(&self) {
        let mut accounts = self.accounts.write();
        for (_, handle) in accounts.drain() {
            handle.market_stream.stop();
            handle.user_stream.stop();
        }
    }
}

macro_rules! handler {
    ($name:ident, $field:ident, $method:ident) => {
        struct $name {
            de: Arc<DeManager>,
        }

        #[async_trait::async_trait]
        impl Handler for $name {
            fn name(&self) -> &str {
                stringify!($name)
            }

            async fn handle(&self, event: Event) -> anyhow::Result<()> {
                self.de.$method(&event).await;
                Ok(())
            }
        }
    };
}

handler!(OnAccountLoaded, de, on_account_loaded);
handler!(OnOrderCreate, de, on_order_create);
handler!(OnOrderCancel, de, on_order_cancel);
handler!(OnGetBalance, de, on_get_balance);
handler!(OnGetHistoricalKlines, de, on_get_historical_klines);
handler!(OnKlineSubscribe, de, on_kline_subscribe);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventStore;
    use crate::event::InMemoryEventStore;

    #[tokio::test]
    async fn account_loaded_with_missing_fields_emits_connection_failed() {
        let store = Arc::new(InMemoryEventStore::new(100));
        let bus = Arc::new(EventBus::new(Some(store.clone())));
        let de = DeManager::new(bus.clone(), 3, Duration::from_secs(3), Duration::from_secs(1800));

        let mut data = Map::new();
        data.insert("user_id".into(), json!("u1"));
        data.insert("api_key".into(), json!(""));
        data.insert("api_secret".into(), json!(""));
        de.on_account_loaded(&Event::with_source("pm.account.loaded", data, "pm")).await;

        let events = store.query_recent(10).await.unwrap();
        assert!(events.iter().any(|e| e.subject == "de.client.connection_failed"));
        assert!(de.client_for("u1").is_none());
    }

    #[tokio::test]
    async fn order_create_with_unknown_account_emits_order_failed() {
        let store = Arc::new(InMemoryEventStore::new(100));
        let bus = Arc::new(EventBus::new(Some(store.clone())));
        let de = DeManager::new(bus.clone(), 3, Duration::from_secs(3), Duration::from_secs(1800));

        let mut data = Map::new();
        data.insert("user_id".into(), json!("unknown"));
        data.insert("symbol".into(), json!("BTCUSDT"));
        data.insert("side".into(), json!("BUY"));
        data.insert("order_type".into(), json!("MARKET"));
        data.insert("quantity".into(), json!("1.0"));
        de.on_order_create(&Event::with_source("trading.order.create", data, "tr")).await;

        let events = store.query_recent(10).await.unwrap();
        assert!(events.iter().any(|e| e.subject == "de.order.failed"));
    }

    #[tokio::test]
    async fn kline_subscribe_for_unknown_account_is_ignored() {
        let store = Arc::new(InMemoryEventStore::new(100));
        let bus = Arc::new(EventBus::new(Some(store.clone())));
        let de = DeManager::new(bus.clone(), 3, Duration::from_secs(3), Duration::from_secs(1800));

        let mut data = Map::new();
        data.insert("user_id".into(), json!("unknown"));
        data.insert("symbol".into(), json!("BTCUSDT"));
        data.insert("interval".into(), json!("1m"));
        de.on_kline_subscribe(&Event::with_source("de.kline.subscribe", data, "ta")).await;

        assert!(de.market_stream_for("unknown").is_none());
    }
}
