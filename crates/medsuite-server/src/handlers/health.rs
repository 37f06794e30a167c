use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use crate::server::AppState;

/// `GET /health/`: `UP` with 200 when every configured backend answers,
/// `DOWN` with 503 otherwise.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let service = state.config.service.name.clone();
    match state.health.check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "UP", "service": service })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "DOWN", "service": service })),
            )
        }
    }
}
