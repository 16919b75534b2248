// =============================================================================
// Dashboard state — read-only snapshot surface over PM/ST/TR + the event store
// =============================================================================
//
// Adapted from the teacher's `app_state::AppState`: the same version-counter
// + `build_snapshot` idiom, narrowed from a single-bot view (candle buffers,
// regime detector, risk engine) down to the five-manager shape this engine
// actually has. Dashboard state holds no state of its own beyond the version
// counters — every field of the snapshot is read live from PM/ST/TR and the
// event store, so there is nothing here to keep in sync.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::event::EventStore;
use crate::pm::PmManager;
use crate::tr::TrManager;

/// Shared across the REST router and the WebSocket push loop via `Arc`.
pub struct DashboardState {
    pub pm: Arc<PmManager>,
    pub tr: Arc<TrManager>,
    pub store: Arc<dyn EventStore>,
    state_version: AtomicU64,
    ws_sequence_number: AtomicU64,
}

impl DashboardState {
    pub fn new(pm: Arc<PmManager>, tr: Arc<TrManager>, store: Arc<dyn EventStore>) -> Self {
        Self {
            pm,
            tr,
            store,
            state_version: AtomicU64::new(1),
            ws_sequence_number: AtomicU64::new(0),
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    pub fn next_ws_sequence(&self) -> u64 {
        self.ws_sequence_number.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Build the full dashboard payload: every loaded account, every tracked
    /// trading task, and a tail of the event store's recent history.
    pub async fn build_snapshot(&self) -> StateSnapshot {
        let accounts = self
            .pm
            .all_user_ids()
            .into_iter()
            .filter_map(|id| self.pm.get(&id))
            .map(|account| AccountSummary {
                user_id: account.user_id.clone(),
                name: account.name.clone(),
                strategy_name: account.strategy_name.clone(),
                testnet: account.is_testnet,
                enabled: account.is_enabled(),
            })
            .collect();

        let trading_tasks = self.tr.snapshot();
        let recent_events = self.store.query_recent(100).await.unwrap_or_default();

        StateSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            accounts,
            trading_tasks,
            recent_events: recent_events
                .into_iter()
                .map(|e| RecentEvent {
                    subject: e.subject,
                    source: e.source,
                    timestamp: e.timestamp.timestamp_millis(),
                    data: e.data.into(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub user_id: String,
    pub name: String,
    pub strategy_name: String,
    pub testnet: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentEvent {
    pub subject: String,
    pub source: Option<String>,
    pub timestamp: i64,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub accounts: Vec<AccountSummary>,
    pub trading_tasks: Vec<serde_json::Value>,
    pub recent_events: Vec<RecentEvent>,
}
