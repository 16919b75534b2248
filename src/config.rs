// =============================================================================
// Engine Configuration — ambient tunables, hot-reloadable, atomically saved
// =============================================================================
//
// Unlike PM/ST config (per-account, credential-bearing, loaded by their own
// managers), this is the engine-wide knob set: retry budgets, the event
// store's retention cap, reconnect/keepalive timing. Every field carries
// `#[serde(default)]` so that adding a new tunable never breaks loading an
// older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_max_retries() -> u32 {
    3
}

fn default_max_events() -> usize {
    1000
}

fn default_reconnect_delay_secs() -> u64 {
    3
}

fn default_keepalive_interval_secs() -> u64 {
    1800
}

fn default_historical_kline_limit() -> u32 {
    200
}

fn default_event_store_retention_days() -> i64 {
    30
}

fn default_config_dir() -> String {
    "config".to_string()
}

fn default_db_path() -> String {
    "data/events.db".to_string()
}

/// Engine-wide tunables. Distinct from `pm::AccountsConfig` (credentials) and
/// `st::StrategyConfig` (per-account strategy parameters).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on `place_order` retry attempts on 5xx/network errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// EventStore retention cap — oldest entries beyond this count are
    /// trimmed after every insert.
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Number of days of event history to retain in `cleanup()`.
    #[serde(default = "default_event_store_retention_days")]
    pub event_store_retention_days: i64,

    /// Fixed delay between WebSocket reconnect attempts.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Listen-key keepalive period for UserDataStream.
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    /// Default `limit` used for `get_historical_klines` when an indicator's
    /// own `min_klines_required` is smaller.
    #[serde(default = "default_historical_kline_limit")]
    pub historical_kline_limit: u32,

    /// Directory containing `pm_config.json` and `strategies/`.
    #[serde(default = "default_config_dir")]
    pub config_dir: String,

    /// Path to the SQLite event store file.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_events: default_max_events(),
            event_store_retention_days: default_event_store_retention_days(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            historical_kline_limit: default_historical_kline_limit(),
            config_dir: default_config_dir(),
            db_path: default_db_path(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file at `path`. Returns an error if the file does
    /// not exist so the caller can fall back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;
        info!(path = %path.display(), "engine config loaded");
        Ok(config)
    }

    /// Persist via the atomic tmp + rename pattern to avoid corruption on
    /// crash mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).context("failed to serialise engine config")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.max_events, 1000);
        assert_eq!(cfg.reconnect_delay_secs, 3);
        assert_eq!(cfg.keepalive_interval_secs, 1800);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.db_path, "data/events.db");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "max_retries": 5 }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.max_events, 1000);
    }
}
