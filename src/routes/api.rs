use std::sync::Arc;

use axum::{routing::get, Router};

use crate::handlers::health::{health_check, ready_check};
use crate::server::handler::websocket_handler;
use crate::server::room::RoomRegistry;

/// Create the service routes: liveness/readiness plus the collaboration
/// WebSocket endpoint.
pub fn create_routes(registry: Arc<RoomRegistry>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/ws", get(websocket_handler))
        .with_state(registry)
}
