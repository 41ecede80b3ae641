//! HTTP surface: health check and WebSocket upgrade

use axum::{
    Json, Router,
    extract::{ConnectInfo, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use std::net::SocketAddr;

use crate::error::RealtimeError;
use crate::gateway::ws::serve_socket;
use crate::state::AppState;

const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Create the router for the realtime service
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<impl IntoResponse, RealtimeError> {
    if !state.storage_healthy().await? {
        return Err(RealtimeError::Infrastructure(
            "Storage health check failed".to_string(),
        ));
    }

    let registry = state.gateway.registry();
    Ok(Json(json!({
        "status": "ok",
        "service": "realtime-service",
        "storage": state.storage.name(),
        "connections": registry.connection_count(),
        "online_users": registry.online_user_count(),
    })))
}

/// Upgrade to a WebSocket and hand the socket to the gateway
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let gateway = state.gateway.clone();
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| serve_socket(socket, gateway, addr.ip().to_string()))
}
