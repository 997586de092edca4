// Module: http
// Health check and the signaling WebSocket endpoint

pub mod health;
pub mod websocket;

use axum::{routing::get, Router};
use huddle_sfu::SfuManager;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::presence::PresenceHub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub sfu: Arc<SfuManager>,
    pub presence: PresenceHub,
    pub server: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(sfu: Arc<SfuManager>, presence: PresenceHub, server: ServerConfig) -> Self {
        Self {
            sfu,
            presence,
            server: Arc::new(server),
        }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::create_health_router())
        .route("/ws", get(websocket::websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
