// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// A trimmed, read-only surface: `/api/v1/health` is public, everything else
// requires a valid Bearer token via `AuthBearer`. There is no mutation
// endpoint — the dashboard observes the engine, it does not drive it.
// =============================================================================

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::api::auth::AuthBearer;
use crate::api::dashboard_state::DashboardState;

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<DashboardState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/accounts", get(accounts))
        .route("/api/v1/trading-tasks", get(trading_tasks))
        .route("/api/v1/events", get(recent_events))
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<DashboardState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

async fn full_state(_auth: AuthBearer, State(state): State<Arc<DashboardState>>) -> impl IntoResponse {
    Json(state.build_snapshot().await)
}

async fn accounts(_auth: AuthBearer, State(state): State<Arc<DashboardState>>) -> impl IntoResponse {
    Json(state.build_snapshot().await.accounts)
}

async fn trading_tasks(_auth: AuthBearer, State(state): State<Arc<DashboardState>>) -> impl IntoResponse {
    Json(state.build_snapshot().await.trading_tasks)
}

async fn recent_events(_auth: AuthBearer, State(state): State<Arc<DashboardState>>) -> impl IntoResponse {
    Json(state.build_snapshot().await.recent_events)
}
