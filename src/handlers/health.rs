use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use tracing::debug;

use crate::models::HealthResponse;
use crate::server::room::RoomRegistry;

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
    })
}

/// Readiness check endpoint
pub async fn ready_check(State(registry): State<Arc<RoomRegistry>>) -> Json<HealthResponse> {
    debug!("Readiness check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: format!("Service is ready ({} active rooms)", registry.room_count().await),
    })
}
