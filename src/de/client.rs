// =============================================================================
// FuturesClient — USDⓈ-M futures REST client, HMAC-SHA256 signed requests
// =============================================================================
//
// Adapted from the teacher's `binance::client::BinanceClient` (spot): same
// signing helper, same `reqwest::Client` with a default `X-MBX-APIKEY`
// header, same `#[instrument]` tracing per call — repointed at the futures
// host and endpoint set, with retry added on top of the teacher's bare
// `place_order` (which had none).
//
// SECURITY: the secret is never logged or serialised.
// =============================================================================

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

use super::kline::Kline;
use super::rate_limit::RateLimitTracker;

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: u64 = 5000;
const FUTURES_BASE_URL: &str = "https://fapi.binance.com";

/// USDⓈ-M futures REST client, one per account.
#[derive(Clone)]
pub struct FuturesClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
    rate_limit: std::sync::Arc<RateLimitTracker>,
    max_retries: u32,
}

impl FuturesClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, max_retries: u32) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!(base_url = FUTURES_BASE_URL, "FuturesClient initialised");

        Self {
            api_key,
            secret,
            base_url: FUTURES_BASE_URL.to_string(),
            client,
            rate_limit: std::sync::Arc::new(RateLimitTracker::new()),
            max_retries,
        }
    }

    pub fn rate_limit(&self) -> &RateLimitTracker {
        &self.rate_limit
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    // -------------------------------------------------------------------------
    // Historical klines
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/klines (public, no signature, no retry — "none — 1×").
    #[instrument(skip(self), name = "futures::get_historical_klines")]
    pub async fn get_historical_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Kline>> {
        let url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v1/klines request failed")?;

        self.rate_limit.update_from_headers(resp.headers());
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.context("failed to parse klines response")?;

        if !status.is_success() {
            anyhow::bail!("GET /fapi/v1/klines returned {}: {}", status, body);
        }

        let raw = body.as_array().context("klines response is not an array")?;
        let mut klines = Vec::with_capacity(raw.len());

        for entry in raw {
            let arr = entry.as_array().context("kline entry is not an array")?;
            if arr.len() < 7 {
                warn!("skipping malformed kline entry with {} elements", arr.len());
                continue;
            }
            let open_time = arr[0].as_i64().unwrap_or(0);
            let open = Self::parse_decimal(&arr[1])?;
            let high = Self::parse_decimal(&arr[2])?;
            let low = Self::parse_decimal(&arr[3])?;
            let close = Self::parse_decimal(&arr[4])?;
            let volume = Self::parse_decimal(&arr[5])?;

            klines.push(Kline {
                open,
                high,
                low,
                close,
                volume,
                timestamp: open_time,
                is_closed: true,
            });
        }

        debug!(symbol, interval, count = klines.len(), "historical klines fetched");
        Ok(klines)
    }

    // -------------------------------------------------------------------------
    // Account / balance
    // -------------------------------------------------------------------------

    /// GET /fapi/v2/balance (signed).
    #[instrument(skip(self), name = "futures::get_account_balance")]
    pub async fn get_account_balance(&self, asset: &str) -> Result<(Decimal, Decimal)> {
        let qs = self.signed_query("");
        let url = format!("{}/fapi/v2/balance?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v2/balance request failed")?;

        self.rate_limit.update_from_headers(resp.headers());
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.context("failed to parse balance response")?;

        if !status.is_success() {
            anyhow::bail!("GET /fapi/v2/balance returned {}: {}", status, body);
        }

        let entries = body.as_array().context("balance response is not an array")?;
        for entry in entries {
            if entry.get("asset").and_then(|v| v.as_str()) == Some(asset) {
                let balance = Self::parse_decimal(entry.get("balance").unwrap_or(&serde_json::Value::Null))
                    .unwrap_or(Decimal::ZERO);
                let available = Self::parse_decimal(entry.get("availableBalance").unwrap_or(&serde_json::Value::Null))
                    .unwrap_or(Decimal::ZERO);
                return Ok((balance, available));
            }
        }

        warn!(asset, "asset not found in balances — returning 0");
        Ok((Decimal::ZERO, Decimal::ZERO))
    }

    // -------------------------------------------------------------------------
    // Listen key lifecycle
    // -------------------------------------------------------------------------

    #[instrument(skip(self), name = "futures::create_listen_key")]
    pub async fn create_listen_key(&self) -> Result<String> {
        let url = format!("{}/fapi/v1/listenKey", self.base_url);
        let resp = self.client.post(&url).send().await.context("POST /fapi/v1/listenKey failed")?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.context("failed to parse listenKey response")?;
        if !status.is_success() {
            anyhow::bail!("POST /fapi/v1/listenKey returned {}: {}", status, body);
        }
        body.get("listenKey")
            .and_then(|v| v.as_str())
            .map(String::from)
            .context("listenKey missing from response")
    }

    #[instrument(skip(self, listen_key), name = "futures::keepalive_listen_key")]
    pub async fn keepalive_listen_key(&self, listen_key: &str) -> Result<()> {
        let url = format!("{}/fapi/v1/listenKey?listenKey={}", self.base_url, listen_key);
        let resp = self.client.put(&url).send().await.context("PUT /fapi/v1/listenKey failed")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("PUT /fapi/v1/listenKey returned {}", status);
        }
        Ok(())
    }

    #[instrument(skip(self, listen_key), name = "futures::close_listen_key")]
    pub async fn close_listen_key(&self, listen_key: &str) -> Result<()> {
        let url = format!("{}/fapi/v1/listenKey?listenKey={}", self.base_url, listen_key);
        let resp = self.client.delete(&url).send().await.context("DELETE /fapi/v1/listenKey failed")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("DELETE /fapi/v1/listenKey returned {}", status);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// POST /fapi/v1/order (signed), retried up to `max_retries` on 5xx or
    /// network errors only — 4xx responses are terminal.
    #[instrument(skip(self, price, time_in_force, client_order_id), name = "futures::place_order")]
    pub async fn place_order(
        &self,
        symbol: &str,
        side: &str,
        order_type: &str,
        quantity: Decimal,
        price: Option<Decimal>,
        time_in_force: Option<&str>,
        reduce_only: Option<bool>,
        client_order_id: Option<&str>,
    ) -> Result<serde_json::Value> {
        if !self.rate_limit.can_place_order() {
            anyhow::bail!("order blocked by local rate-limit guard");
        }

        let wire_type = if order_type == "POST_ONLY" { "LIMIT" } else { order_type };

        let mut params = format!("symbol={symbol}&side={side}&type={wire_type}&quantity={quantity}");
        if let Some(p) = price {
            params.push_str(&format!("&price={p}"));
        }
        if wire_type == "LIMIT" {
            let tif = if order_type == "POST_ONLY" { "GTX" } else { time_in_force.unwrap_or("GTC") };
            params.push_str(&format!("&timeInForce={tif}"));
        }
        if let Some(ro) = reduce_only {
            params.push_str(&format!("&reduceOnly={ro}"));
        }
        if let Some(coid) = client_order_id {
            params.push_str(&format!("&newClientOrderId={coid}"));
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let qs = self.signed_query(&params);
            let url = format!("{}/fapi/v1/order?{}", self.base_url, qs);

            debug!(symbol, side, order_type, %quantity, attempt, "placing order");

            let send_result = self.client.post(&url).send().await;
            let resp = match send_result {
                Ok(r) => r,
                Err(e) => {
                    if attempt > self.max_retries {
                        return Err(e).context("POST /fapi/v1/order request failed after retries");
                    }
                    warn!(attempt, error = %e, "order request failed at network level — retrying");
                    continue;
                }
            };

            self.rate_limit.update_from_headers(resp.headers());
            let status = resp.status();
            let body: serde_json::Value = resp.json().await.context("failed to parse order response")?;

            if status.is_success() {
                self.rate_limit.record_order_sent();
                debug!(symbol, side, "order placed successfully");
                return Ok(body);
            }

            if status.is_server_error() && attempt <= self.max_retries {
                warn!(attempt, status = %status, "order placement hit 5xx — retrying");
                continue;
            }

            anyhow::bail!("POST /fapi/v1/order returned {}: {}", status, body);
        }
    }

    /// DELETE /fapi/v1/order (signed) — exactly one of `order_id` /
    /// `client_order_id` must be provided.
    #[instrument(skip(self), name = "futures::cancel_order")]
    pub async fn cancel_order(&self, symbol: &str, order_id: Option<u64>, client_order_id: Option<&str>) -> Result<serde_json::Value> {
        let params = match (order_id, client_order_id) {
            (Some(id), _) => format!("symbol={symbol}&orderId={id}"),
            (None, Some(coid)) => format!("symbol={symbol}&origClientOrderId={coid}"),
            (None, None) => anyhow::bail!("cancel_order requires either order_id or client_order_id"),
        };

        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.base_url, qs);

        let resp = self.client.delete(&url).send().await.context("DELETE /fapi/v1/order request failed")?;
        self.rate_limit.update_from_headers(resp.headers());
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.context("failed to parse cancel response")?;

        if !status.is_success() {
            anyhow::bail!("DELETE /fapi/v1/order returned {}: {}", status, body);
        }

        debug!(symbol, "order cancelled");
        Ok(body)
    }

    fn parse_decimal(val: &serde_json::Value) -> Result<Decimal> {
        if let Some(s) = val.as_str() {
            s.parse::<Decimal>().with_context(|| format!("failed to parse '{s}' as Decimal"))
        } else if let Some(n) = val.as_f64() {
            Decimal::try_from(n).context("failed to convert f64 to Decimal")
        } else {
            anyhow::bail!("expected string or number, got: {val}")
        }
    }

    #[cfg(test)]
    fn unused_api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for FuturesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuturesClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic() {
        let client = FuturesClient::new("key", "secret", 3);
        let a = client.sign("symbol=BTCUSDT&timestamp=1");
        let b = client.sign("symbol=BTCUSDT&timestamp=1");
        assert_eq!(a, b);
        assert_ne!(a, client.sign("symbol=ETHUSDT&timestamp=1"));
    }

    #[test]
    fn api_key_never_appears_in_debug_output() {
        let client = FuturesClient::new("super-secret-key", "super-secret-secret", 3);
        let debug = format!("{client:?}");
        assert!(!debug.contains("super-secret-key"));
        assert!(!debug.contains("super-secret-secret"));
        assert_eq!(client.unused_api_key(), "super-secret-key");
    }
}
