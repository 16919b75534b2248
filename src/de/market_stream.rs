// =============================================================================
// MarketStream — per-account kline WebSocket with auto-reconnect
// =============================================================================
//
// Adapted from the teacher's `market_data::candle_buffer::run_kline_stream`:
// same `tokio_tungstenite::connect_async` idiom, same single-stream/combined-
// stream disambiguation, same string-parsing helper (here: to `Decimal`
// rather than `f64`). The teacher loops the connection from `main.rs`;
// this rewrite moves the reconnect loop inside the stream type itself so
// one instance owns its full lifecycle, since DE now holds one per account.
//
// Resolved open question: `de.kline.update` is emitted on every tick
// (closed or not) — matching the teacher's `CandleBuffer::update`, which
// updates the live candle in place on every message. TA is the layer that
// gates on `is_closed`/readiness.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde_json::{json, Map};
use tokio::sync::Notify;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use super::kline::Kline;
use crate::event::{Event, EventBus};

const BASE_WS_URL: &str = "wss://fstream.binance.com";

/// One market-data WebSocket per account. Subscriptions survive across
/// reconnects; adding a new one while connected forces an immediate
/// resubscribe (tear down and reconnect with the new stream set).
pub struct MarketStream {
    user_id: String,
    bus: Arc<EventBus>,
    subscriptions: RwLock<Vec<(String, String)>>,
    should_reconnect: Arc<AtomicBool>,
    resubscribe: Arc<Notify>,
    reconnect_delay: Duration,
}

impl MarketStream {
    pub fn new(user_id: impl Into<String>, bus: Arc<EventBus>, reconnect_delay: Duration) -> Self {
        Self {
            user_id: user_id.into(),
            bus,
            subscriptions: RwLock::new(Vec::new()),
            should_reconnect: Arc::new(AtomicBool::new(true)),
            resubscribe: Arc::new(Notify::new()),
            reconnect_delay,
        }
    }

    /// Append `(symbol, interval)` if not already present; if currently
    /// connected, force a resubscribe.
    pub fn subscribe_kline(&self, symbol: &str, interval: &str) {
        let pair = (symbol.to_uppercase(), interval.to_string());
        let mut subs = self.subscriptions.write();
        if subs.contains(&pair) {
            return;
        }
        subs.push(pair);
        drop(subs);
        self.resubscribe.notify_one();
    }

    pub fn stop(&self) {
        self.should_reconnect.store(false, Ordering::SeqCst);
        self.resubscribe.notify_one();
    }

    fn build_url(&self) -> String {
        let subs = self.subscriptions.read();
        if subs.is_empty() {
            return format!("{BASE_WS_URL}/ws");
        }
        let streams: Vec<String> = subs
            .iter()
            .map(|(symbol, interval)| format!("{}@kline_{interval}", symbol.to_lowercase()))
            .collect();
        format!("{BASE_WS_URL}/stream?streams={}", streams.join("/"))
    }

    /// Drive the connect/read/reconnect loop until [`MarketStream::stop`] is
    /// called. Intended to be `tokio::spawn`ed once per account.
    pub async fn run(self: Arc<Self>) {
        while self.should_reconnect.load(Ordering::SeqCst) {
            if let Err(e) = self.connect_once().await {
                warn!(user_id = %self.user_id, error = %e, "market stream connection failed");
            }

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
        let url = self.build_url();
        info!(user_id = %self.user_id, url = %url, "connecting market stream");

        let (ws_stream, _response) = connect_async(&url)
            .await
            .context("failed to connect to market WebSocket")?;

        let mut data = Map::new();
        data.insert("user_id".into(), json!(self.user_id));
        data.insert("connection_type".into(), json!("market"));
        self.bus
            .publish(Event::with_source("de.websocket.connected", data, "de"), true)
            .await;

        let (_write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                _ = self.resubscribe.notified() => {
                    debug!(user_id = %self.user_id, "market stream resubscribing");
                    return Ok(());
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                            if let Err(e) = self.handle_message(&text).await {
                                warn!(user_id = %self.user_id, error = %e, "failed to parse market stream message");
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(user_id = %self.user_id, error = %e, "market stream read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!(user_id = %self.user_id, "market stream ended");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn handle_message(&self, text: &str) -> Result<()> {
        let root: serde_json::Value = serde_json::from_str(text).context("invalid JSON")?;
        let payload = root.get("data").unwrap_or(&root);

        if payload.get("e").and_then(|v| v.as_str()) != Some("kline") {
            return Ok(());
        }

        let symbol = payload["s"].as_str().context("missing field s")?.to_uppercase();
        let k = &payload["k"];
        let interval = k["i"].as_str().context("missing field k.i")?.to_string();

        let kline = Kline {
            open: parse_decimal(&k["o"])?,
            high: parse_decimal(&k["h"])?,
            low: parse_decimal(&k["l"])?,
            close: parse_decimal(&k["c"])?,
            volume: parse_decimal(&k["v"])?,
            timestamp: k["t"].as_i64().context("missing field k.t")?,
            is_closed: k["x"].as_bool().context("missing field k.x")?,
        };

        let mut data = Map::new();
        data.insert("user_id".into(), json!(self.user_id));
        data.insert("symbol".into(), json!(symbol));
        data.insert("interval".into(), json!(interval));
        data.insert("kline".into(), kline.to_json());
        self.bus.publish(Event::with_source("de.kline.update", data, "de"), true).await;

        Ok(())
    }
}

fn parse_decimal(val: &serde_json::Value) -> Result<Decimal> {
    match val {
        serde_json::Value::String(s) => s.parse::<Decimal>().with_context(|| format!("failed to parse '{s}' as Decimal")),
        serde_json::Value::Number(n) => Decimal::try_from(n.as_f64().unwrap_or(0.0)).context("failed to convert number to Decimal"),
        _ => anyhow::bail!("expected string or number"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_with_no_subscriptions_uses_bare_ws() {
        let stream = MarketStream::new("u1", Arc::new(EventBus::new(None)), Duration::from_secs(3));
        assert_eq!(stream.build_url(), "wss://fstream.binance.com/ws");
    }

    #[test]
    fn build_url_composes_stream_names() {
        let stream = MarketStream::new("u1", Arc::new(EventBus::new(None)), Duration::from_secs(3));
        stream.subscribe_kline("BTCUSDT", "1m");
        stream.subscribe_kline("ethusdt", "5m");
        let url = stream.build_url();
        assert!(url.contains("btcusdt@kline_1m"));
        assert!(url.contains("ethusdt@kline_5m"));
        assert!(url.starts_with("wss://fstream.binance.com/stream?streams="));
    }

    #[test]
    fn subscribe_kline_dedups_exact_pairs() {
        let stream = MarketStream::new("u1", Arc::new(EventBus::new(None)), Duration::from_secs(3));
        stream.subscribe_kline("BTCUSDT", "1m");
        stream.subscribe_kline("BTCUSDT", "1m");
        assert_eq!(stream.subscriptions.read().len(), 1);
    }
}
