// =============================================================================
// api — read-only dashboard surface (REST + WebSocket)
// =============================================================================

pub mod auth;
pub mod dashboard_state;
pub mod rest;
pub mod ws;
