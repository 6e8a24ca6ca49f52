//! Relay service: accepts WebSocket clients and re-broadcasts every
//! inbound frame to all *other* connections. Stateless across messages;
//! it counts connections and forwards text, nothing more.

pub mod cli;
pub mod config;
pub mod handlers;
pub mod relay;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{health_check, not_found};
use crate::relay::{websocket_handler, RelayState};

/// The full HTTP surface: the relay endpoint, the health probe and a
/// JSON 404 for everything else. CORS is wide open — this serves
/// pairing convenience, not secrets.
pub fn relay_router(state: RelayState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_check))
        .fallback(not_found)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
