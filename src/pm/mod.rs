// =============================================================================
// PM — Portfolio Manager: the account registry
// =============================================================================
//
// New module; the teacher has no multi-account concept at all (it trades one
// spot portfolio for one set of credentials). Grounded in the teacher's
// `runtime_config::RuntimeConfig` serde idiom — `#[serde(default)]` fields,
// mandatory-field validation, load returning `anyhow::Result` — generalised
// from one engine-wide config file to the multi-user config shape.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Map};
use tracing::{info, warn};

use crate::event::{Event, EventBus};

/// One account's static identity plus its mutable `enabled` flag.
///
/// Owned exclusively by the PM registry — other modules hold only `user_id`
/// and receive credentials via the `pm.account.loaded` event, never by
/// reaching into this struct directly.
pub struct Account {
    pub user_id: String,
    pub name: String,
    pub api_key: String,
    pub api_secret: String,
    pub strategy_name: String,
    pub is_testnet: bool,
    enabled: AtomicBool,
}

impl Account {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Deserialize)]
struct RawAccountsFile {
    #[serde(default)]
    users: HashMap<String, RawAccountEntry>,
}

#[derive(Debug, Deserialize)]
struct RawAccountEntry {
    name: Option<String>,
    api_key: Option<String>,
    api_secret: Option<String>,
    strategy: Option<String>,
    testnet: Option<serde_json::Value>,
}

/// Singleton account registry, bound to the bus at construction.
pub struct PmManager {
    bus: Arc<EventBus>,
    accounts: RwLock<HashMap<String, Arc<Account>>>,
}

impl PmManager {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Load `config/pm_config.json`, constructing and registering one
    /// `Account` per valid entry. Invalid entries never abort the load —
    /// they are recorded and reported via `pm.load.failed`, mirroring the
    /// teacher's "skip the bad one, keep going" posture for malformed kline
    /// entries in `get_klines`.
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read PM config from {}", path.display()))?;
        let raw: RawAccountsFile = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse PM config from {}", path.display()))?;

        let mut loaded_count = 0usize;
        let mut failed: HashMap<String, String> = HashMap::new();
        let mut user_ids = Vec::new();

        for (user_id, entry) in raw.users {
            match validate_entry(&entry) {
                Ok((name, api_key, api_secret, strategy_name, is_testnet)) => {
                    let account = Arc::new(Account {
                        user_id: user_id.clone(),
                        name,
                        api_key: api_key.clone(),
                        api_secret: api_secret.clone(),
                        strategy_name: strategy_name.clone(),
                        is_testnet,
                        enabled: AtomicBool::new(true),
                    });

                    self.accounts.write().insert(user_id.clone(), account.clone());

                    let mut data = Map::new();
                    data.insert("user_id".into(), json!(user_id));
                    data.insert("name".into(), json!(account.name));
                    data.insert("api_key".into(), json!(api_key));
                    data.insert("api_secret".into(), json!(api_secret));
                    data.insert("strategy_name".into(), json!(strategy_name));
                    data.insert("testnet".into(), json!(is_testnet));
                    self.bus
                        .publish(Event::with_source("pm.account.loaded", data, "pm"), true)
                        .await;

                    loaded_count += 1;
                    user_ids.push(user_id);
                }
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "account config entry failed validation");
                    let mut data = Map::new();
                    data.insert("user_id".into(), json!(user_id));
                    data.insert("error".into(), json!(e.to_string()));
                    self.bus
                        .publish(Event::with_source("pm.load.failed", data, "pm"), true)
                        .await;
                    failed.insert(user_id, e.to_string());
                }
            }
        }

        info!(loaded_count, failed_count = failed.len(), "PM config load complete");

        let mut ready_data = Map::new();
        ready_data.insert("loaded_count".into(), json!(loaded_count));
        ready_data.insert("failed_count".into(), json!(failed.len()));
        ready_data.insert("user_ids".into(), json!(user_ids));
        self.bus
            .publish(Event::with_source("pm.manager.ready", ready_data, "pm"), true)
            .await;

        Ok(())
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<Account>> {
        self.accounts.read().get(user_id).cloned()
    }

    pub fn all_user_ids(&self) -> Vec<String> {
        self.accounts.read().keys().cloned().collect()
    }

    /// Flip `enabled` to true and announce it. A no-op publish if the
    /// account is unknown.
    pub async fn enable(&self, user_id: &str) {
        if let Some(account) = self.get(user_id) {
            account.enabled.store(true, Ordering::SeqCst);
            let mut data = Map::new();
            data.insert("user_id".into(), json!(user_id));
            self.bus
                .publish(Event::with_source("pm.account.enabled", data, "pm"), true)
                .await;
        }
    }

    /// Flip `enabled` to false and announce it, unless `persist` is false
    /// (used during shutdown to avoid writing to a closing store).
    pub async fn disable(&self, user_id: &str, persist: bool) {
        if let Some(account) = self.get(user_id) {
            account.enabled.store(false, Ordering::SeqCst);
            let mut data = Map::new();
            data.insert("user_id".into(), json!(user_id));
            self.bus
                .publish(Event::with_source("pm.account.disabled", data, "pm"), persist)
                .await;
        }
    }

    /// Disable every account without persisting, announce shutdown, then
    /// clear the registry.
    pub async fn shutdown(&self) {
        let user_ids = self.all_user_ids();
        for user_id in &user_ids {
            self.disable(user_id, false).await;
        }
        self.bus
            .publish(Event::with_source("pm.manager.shutdown", Map::new(), "pm"), false)
            .await;
        self.accounts.write().clear();
    }
}

fn validate_entry(entry: &RawAccountEntry) -> Result<(String, String, String, String, bool)> {
    let name = non_empty(entry.name.as_deref(), "name")?;
    let api_key = non_empty(entry.api_key.as_deref(), "api_key")?;
    let api_secret = non_empty(entry.api_secret.as_deref(), "api_secret")?;
    let strategy_name = non_empty(entry.strategy.as_deref(), "strategy")?;
    let is_testnet = match &entry.testnet {
        None => false,
        Some(serde_json::Value::Bool(b)) => *b,
        Some(_) => anyhow::bail!("field 'testnet' must be a boolean"),
    };
    Ok((name, api_key, api_secret, strategy_name, is_testnet))
}

fn non_empty(value: Option<&str>, field: &str) -> Result<String> {
    match value {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => anyhow::bail!("field '{field}' is missing or empty"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::InMemoryEventStore;

    fn manager_with_file(contents: &str) -> (PmManager, std::path::PathBuf) {
        let path = std::env::temp_dir().join(format!("nexus-perp-pm-test-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        let store = Arc::new(InMemoryEventStore::new(100));
        let bus = Arc::new(EventBus::new(Some(store)));
        (PmManager::new(bus), path)
    }

    #[tokio::test]
    async fn valid_entries_are_loaded_and_invalid_ones_skipped() {
        let json = r#"{
            "users": {
                "user_001": {"name": "Alice", "api_key": "k", "api_secret": "s", "strategy": "ensemble"},
                "user_002": {"name": "", "api_key": "k", "api_secret": "s", "strategy": "ensemble"}
            }
        }"#;
        let (pm, path) = manager_with_file(json);
        pm.load(&path).await.unwrap();

        assert!(pm.get("user_001").is_some());
        assert!(pm.get("user_002").is_none());
        assert_eq!(pm.all_user_ids().len(), 1);
    }

    #[tokio::test]
    async fn disable_then_enable_round_trips_flag() {
        let json = r#"{"users": {"u": {"name": "A", "api_key": "k", "api_secret": "s", "strategy": "x"}}}"#;
        let (pm, path) = manager_with_file(json);
        pm.load(&path).await.unwrap();

        let account = pm.get("u").unwrap();
        assert!(account.is_enabled());

        pm.disable("u", true).await;
        assert!(!pm.get("u").unwrap().is_enabled());

        pm.enable("u").await;
        assert!(pm.get("u").unwrap().is_enabled());
    }

    #[tokio::test]
    async fn shutdown_clears_registry() {
        let json = r#"{"users": {"u": {"name": "A", "api_key": "k", "api_secret": "s", "strategy": "x"}}}"#;
        let (pm, path) = manager_with_file(json);
        pm.load(&path).await.unwrap();
        pm.shutdown().await;
        assert!(pm.all_user_ids().is_empty());
    }
}
