//! WebSocket upgrade handler for streaming sessions.
//!
//! The handler only extracts the session id and upgrades; everything else
//! (setup frame, validation, session construction, teardown) lives in the
//! client bridge.

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;

use crate::api::AppState;
use crate::session::bridge;

/// Upgrade handler for `/api/v1/streaming/ws/{session_id}`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    log::info!("[WS] Upgrade requested for session {}", session_id);
    let registry = state.registry;
    let config = state.config;
    ws.on_upgrade(move |socket| bridge::run_client_session(socket, session_id, registry, config))
}
