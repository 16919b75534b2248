// =============================================================================
// Bootstrap — wires the five managers onto the bus and drives shutdown
// =============================================================================
//
// Grounded in the teacher's `main.rs` orchestration shape: build shared
// state, spawn the long-running loops, wait on `ctrl_c()`, then tear down.
// The teacher builds one `AppState` and spawns stream/strategy/reconcile
// loops directly off it; here each manager owns its own lifecycle and
// `Bootstrap` only does the construction, `register_handlers` calls, and
// the final `ctrl_c()` → shutdown sequence.
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::api::dashboard_state::DashboardState;
use crate::config::EngineConfig;
use crate::de::DeManager;
use crate::event::{EventBus, EventStore, SqliteEventStore};
use crate::pm::PmManager;
use crate::st::StManager;
use crate::ta::TaManager;
use crate::tr::TrManager;

pub struct Bootstrap {
    pub bus: Arc<EventBus>,
    pub store: Arc<dyn EventStore>,
    pub pm: Arc<PmManager>,
    pub de: Arc<DeManager>,
    pub ta: Arc<TaManager>,
    pub st: Arc<StManager>,
    pub tr: Arc<TrManager>,
}

impl Bootstrap {
    /// Open the event store, construct every manager, and subscribe each
    /// one's handlers to the shared bus. Does not yet load accounts or
    /// spawn the API server — call [`Bootstrap::run`] for that.
    pub async fn new(config: &EngineConfig) -> Result<Self> {
        let store: Arc<dyn EventStore> = Arc::new(
            SqliteEventStore::open(&config.db_path, config.event_store_retention_days)
                .with_context(|| format!("failed to open event store at {}", config.db_path))?,
        );
        let bus = Arc::new(EventBus::new(Some(store.clone())));

        let pm = Arc::new(PmManager::new(bus.clone()));
        let de = DeManager::new(
            bus.clone(),
            config.max_retries,
            Duration::from_secs(config.reconnect_delay_secs),
            Duration::from_secs(config.keepalive_interval_secs),
        );
        let ta = TaManager::new(bus.clone());
        let st = StManager::new(bus.clone(), PathBuf::from(&config.config_dir).join("strategies"));
        let tr = TrManager::new(bus.clone(), PathBuf::from(&config.config_dir).join("strategies"));

        de.register_handlers();
        ta.register_handlers();
        st.register_handlers();
        tr.register_handlers();

        Ok(Self { bus, store, pm, de, ta, st, tr })
    }

    /// Load every configured account (fanning `pm.account.loaded` out to
    /// DE/ST/TR), start the dashboard API server, and block until a
    /// shutdown signal arrives.
    pub async fn run(self, config: &EngineConfig, bind_addr: &str) -> Result<()> {
        let accounts_path = PathBuf::from(&config.config_dir).join("pm_config.json");
        if let Err(e) = self.pm.load(&accounts_path).await {
            warn!(error = %e, path = %accounts_path.display(), "failed to load accounts — continuing with none loaded");
        }

        let dashboard_state = Arc::new(DashboardState::new(self.pm.clone(), self.tr.clone(), self.store.clone()));
        let app = crate::api::rest::router(dashboard_state);
        let listener = tokio::net::TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind dashboard API to {bind_addr}"))?;
        info!(addr = %bind_addr, "dashboard API listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "dashboard API server exited");
            }
        });

        info!("engine running — press Ctrl+C to stop");
        tokio::signal::ctrl_c().await.context("failed to listen for ctrl_c")?;
        warn!("shutdown signal received — stopping gracefully");

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&self) {
        self.pm.shutdown().await;
        self.de.shutdown();
        if let Err(e) = self.store.close().await {
            warn!(error = %e, "failed to close event store cleanly");
        }
        info!("shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_wires_every_manager_without_accounts() {
        let dir = std::env::temp_dir().join(format!("nexus-perp-bootstrap-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let db_path = dir.join("events.db");

        let mut config = EngineConfig::default();
        config.db_path = db_path.to_string_lossy().into_owned();
        config.config_dir = dir.to_string_lossy().into_owned();

        let bootstrap = Bootstrap::new(&config).await.unwrap();
        assert!(bootstrap.pm.all_user_ids().is_empty());

        bootstrap.shutdown().await;
        let _ = std::fs::remove_dir_all(&dir);
    }
}
