//! Axum router for the bridge.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete router: status page, `WebSocket` observers, mirror
/// reads, command forwarding and upstream selection.
///
/// CORS allows any origin so a display served from elsewhere can connect.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/ws", get(ws::ws_observer))
        .route("/api/state", get(handlers::get_state))
        .route("/api/history", get(handlers::get_history))
        .route("/api/status", get(handlers::get_status))
        .route("/api/command", post(handlers::post_command))
        .route("/ports", get(handlers::list_ports))
        .route("/open", post(handlers::open_port))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
