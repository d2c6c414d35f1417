//! Liveness endpoint (§6 `GET /actuator/health`).

use axum::Json;
use axum::response::IntoResponse;
use serde_json::json;

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "UP"}))
}
