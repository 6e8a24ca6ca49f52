use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::relay::RelayState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub service: &'static str,
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub connections: usize,
    pub uptime_seconds: u64,
}

/// Liveness probe for hosting platforms; also handy for checking the
/// relay survived a misbehaving client.
pub async fn health_check(State(state): State<RelayState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        service: "prompter-relay",
        status: "ok",
        timestamp: Utc::now(),
        connections: state.connection_count(),
        uptime_seconds: state.uptime_seconds(),
    })
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "not found", "endpoints": ["/ws", "/health"]})),
    )
}
