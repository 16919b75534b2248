// =============================================================================
// UserDataStream — per-account order/account WebSocket
// =============================================================================
//
// New; the teacher has no user-data stream (spot trading never tracked
// positions). Generalises `MarketStream`'s connect/reconnect shape to the
// listen-key flow: obtain a key via REST, connect to `/ws/<key>`, keep the
// key alive with a periodic PUT, and recreate it from scratch on disconnect.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde_json::{json, Map};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};

use super::client::FuturesClient;
use crate::event::{Event, EventBus};

const BASE_WS_URL: &str = "wss://fstream.binance.com";

pub struct UserDataStream {
    user_id: String,
    client: Arc<FuturesClient>,
    bus: Arc<EventBus>,
    should_reconnect: Arc<AtomicBool>,
    keepalive_interval: Duration,
    reconnect_delay: Duration,
    keepalive_handle: Mutex<Option<JoinHandle<()>>>,
}

impl UserDataStream {
    pub fn new(
        user_id: impl Into<String>,
        client: Arc<FuturesClient>,
        bus: Arc<EventBus>,
        keepalive_interval: Duration,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            client,
            bus,
            should_reconnect: Arc::new(AtomicBool::new(true)),
            keepalive_interval,
            reconnect_delay,
            keepalive_handle: Mutex::new(None),
        }
    }

    pub fn stop(&self) {
        self.should_reconnect.store(false, Ordering::SeqCst);
    }

    pub async fn run(self: Arc<Self>) {
        while self.should_reconnect.load(Ordering::SeqCst) {
            if let Err(e) = self.connect_once().await {
                warn!(user_id = %self.user_id, error = %e, "user data stream connection failed");
            }

            self.abort_keepalive().await;

            if !self.should_reconnect.load(Ordering::SeqCst) {
                break;
            }

            let mut data = Map::new();
            data.insert("user_id".into(), json!(self.user_id));
            data.insert("reason".into(), json!("reconnecting"));
            self.bus
                .publish(Event::with_source("de.websocket.disconnected", data, "de"), true)
                .await;

            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn connect_once(&self) -> Result<()> {
        let listen_key = self
            .client
            .create_listen_key()
            .await
            .context("failed to create listen key")?;

        let url = format!("{BASE_WS_URL}/ws/{listen_key}");
        info!(user_id = %self.user_id, "connecting user data stream");

        let (ws_stream, _response) = connect_async(&url)
            .await
            .context("failed to connect to user data WebSocket")?;

        self.spawn_keepalive(listen_key.clone()).await;

        let mut data = Map::new();
        data.insert("user_id".into(), json!(self.user_id));
        data.insert("listen_key".into(), json!(listen_key));
        self.bus
            .publish(Event::with_source("de.user_stream.started", data, "de"), true)
            .await;

        let (_write, mut read) = ws_stream.split();

        loop {
            match read.next().await {
                Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                    if let Err(e) = self.handle_message(&text).await {
                        warn!(user_id = %self.user_id, error = %e, "failed to parse user data message");
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(user_id = %self.user_id, error = %e, "user data stream read error");
                    return Err(e.into());
                }
                None => {
                    warn!(user_id = %self.user_id, "user data stream ended");
                    return Ok(());
                }
            }
        }
    }

    async fn spawn_keepalive(&self, listen_key: String) {
        let client = self.client.clone();
        let interval = self.keepalive_interval;
        let user_id = self.user_id.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = client.keepalive_listen_key(&listen_key).await {
                    warn!(user_id = %user_id, error = %e, "listen key keepalive failed");
                }
            }
        });
        *self.keepalive_handle.lock().await = Some(handle);
    }

    async fn abort_keepalive(&self) {
        if let Some(handle) = self.keepalive_handle.lock().await.take() {
            handle.abort();
        }
    }

    async fn handle_message(&self, text: &str) -> Result<()> {
        let root: serde_json::Value = serde_json::from_str(text).context("invalid JSON")?;
        let event_type = root.get("e").and_then(|v| v.as_str()).unwrap_or("");

        match event_type {
            "ORDER_TRADE_UPDATE" => self.handle_order_update(&root).await?,
            "ACCOUNT_UPDATE" => self.handle_account_update(&root).await?,
            _ => {}
        }

        Ok(())
    }

    async fn handle_order_update(&self, root: &serde_json::Value) -> Result<()> {
        let o = root.get("o").context("missing field o")?;
        let order_id = o.get("i").and_then(|v| v.as_u64()).context("missing field o.i")?;
        let symbol = o.get("s").and_then(|v| v.as_str()).context("missing field o.s")?.to_string();
        let status = o.get("X").and_then(|v| v.as_str()).context("missing field o.X")?.to_string();
        let filled_quantity = parse_str_f64(o, "z")?;
        let orig_quantity = parse_str_f64(o, "q")?;
        let price = parse_str_f64(o, "p")?;
        let trade_time = o.get("T").and_then(|v| v.as_i64()).unwrap_or(0);

        let mut data = Map::new();
        data.insert("user_id".into(), json!(self.user_id));
        data.insert("order_id".into(), json!(order_id));
        data.insert("symbol".into(), json!(symbol));
        data.insert("status".into(), json!(status));
        data.insert("filled_quantity".into(), json!(filled_quantity));
        data.insert("remaining_quantity".into(), json!(orig_quantity - filled_quantity));
        self.bus.publish(Event::with_source("de.order.update", data, "de"), true).await;

        if status == "FILLED" {
            let mut filled_data = Map::new();
            filled_data.insert("user_id".into(), json!(self.user_id));
            filled_data.insert("order_id".into(), json!(order_id));
            filled_data.insert("symbol".into(), json!(symbol));
            filled_data.insert("side".into(), json!(o.get("S").and_then(|v| v.as_str()).unwrap_or("BUY")));
            filled_data.insert("price".into(), json!(price));
            filled_data.insert("quantity".into(), json!(filled_quantity));
            filled_data.insert("timestamp".into(), json!(trade_time / 1000));
            self.bus
                .publish(Event::with_source("de.order.filled", filled_data, "de"), true)
                .await;
        }

        Ok(())
    }

    async fn handle_account_update(&self, root: &serde_json::Value) -> Result<()> {
        let a = root.get("a").context("missing field a")?;

        if let Some(balances) = a.get("B").and_then(|v| v.as_array()) {
            if let Some(usdt) = balances.iter().find(|b| b.get("a").and_then(|v| v.as_str()) == Some("USDT")) {
                let wallet_balance = parse_str_f64(usdt, "wb")?;
                let cross_wallet_balance = parse_str_f64(usdt, "cw")?;

                let mut data = Map::new();
                data.insert("total_equity".into(), json!(wallet_balance));
                data.insert("available_balance".into(), json!(cross_wallet_balance));
                data.insert("margin_used".into(), json!(wallet_balance - cross_wallet_balance));
                self.bus.publish(Event::with_source("de.account.update", data, "de"), true).await;
            }
        }

        if let Some(positions) = a.get("P").and_then(|v| v.as_array()) {
            for p in positions {
                let symbol = p.get("s").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let position_amount = parse_str_f64(p, "pa")?;
                let entry_price = parse_str_f64(p, "ep")?;
                let unrealized_pnl = parse_str_f64(p, "up")?;

                let mut data = Map::new();
                data.insert("symbol".into(), json!(symbol));
                data.insert("side".into(), json!(if position_amount > 0.0 { "LONG" } else { "SHORT" }));
                data.insert("quantity".into(), json!(position_amount.abs()));
                data.insert("unrealized_pnl".into(), json!(unrealized_pnl));
                data.insert("entry_price".into(), json!(entry_price));
                self.bus.publish(Event::with_source("de.position.update", data, "de"), true).await;
            }
        }

        Ok(())
    }
}

fn parse_str_f64(obj: &serde_json::Value, key: &str) -> Result<f64> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .with_context(|| format!("missing field {key}"))?
        .parse::<f64>()
        .with_context(|| format!("failed to parse field {key} as f64"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventStore;
    use crate::event::InMemoryEventStore;

    fn test_client() -> Arc<FuturesClient> {
        Arc::new(FuturesClient::new("key".to_string(), "secret".to_string(), 3))
    }

    #[tokio::test]
    async fn order_trade_update_not_filled_emits_only_update() {
        let store = Arc::new(InMemoryEventStore::new(100));
        let bus = Arc::new(EventBus::new(Some(store.clone())));
        let stream = UserDataStream::new("u1", test_client(), bus, Duration::from_secs(1800), Duration::from_secs(3));

        let msg = serde_json::json!({
            "e": "ORDER_TRADE_UPDATE",
            "o": {"i": 123, "s": "BTCUSDT", "X": "PARTIALLY_FILLED", "z": "1.0", "q": "2.0", "p": "50000.0", "T": 1_700_000_000_000i64}
        });
        stream.handle_message(&msg.to_string()).await.unwrap();

        let events = store.query_recent(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subject, "de.order.update");
    }

    #[tokio::test]
    async fn order_trade_update_filled_emits_both_events() {
        let store = Arc::new(InMemoryEventStore::new(100));
        let bus = Arc::new(EventBus::new(Some(store.clone())));
        let stream = UserDataStream::new("u1", test_client(), bus, Duration::from_secs(1800), Duration::from_secs(3));

        let msg = serde_json::json!({
            "e": "ORDER_TRADE_UPDATE",
            "o": {"i": 123, "s": "BTCUSDT", "X": "FILLED", "z": "2.0", "q": "2.0", "p": "50000.0", "T": 1_700_000_000_000i64}
        });
        stream.handle_message(&msg.to_string()).await.unwrap();

        let events = store.query_recent(10).await.unwrap();
        let subjects: Vec<&str> = events.iter().map(|e| e.subject.as_str()).collect();
        assert!(subjects.contains(&"de.order.update"));
        assert!(subjects.contains(&"de.order.filled"));
    }

    #[tokio::test]
    async fn account_update_extracts_usdt_and_positions() {
        let store = Arc::new(InMemoryEventStore::new(100));
        let bus = Arc::new(EventBus::new(Some(store.clone())));
        let stream = UserDataStream::new("u1", test_client(), bus, Duration::from_secs(1800), Duration::from_secs(3));

        let msg = serde_json::json!({
            "e": "ACCOUNT_UPDATE",
            "a": {
                "B": [{"a": "USDT", "wb": "1000.0", "cw": "800.0"}],
                "P": [{"s": "BTCUSDT", "pa": "-0.5", "ep": "50000.0", "up": "10.0"}]
            }
        });
        stream.handle_message(&msg.to_string()).await.unwrap();

        let events = store.query_recent(10).await.unwrap();
        let account_event = events.iter().find(|e| e.subject == "de.account.update").unwrap();
        assert_eq!(account_event.get("margin_used").and_then(|v| v.as_f64()), Some(200.0));

        let position_event = events.iter().find(|e| e.subject == "de.position.update").unwrap();
        assert_eq!(position_event.get_str("side"), Some("SHORT"));
    }
}
