// Health endpoints

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api::routes::AppState;

/// GET /health/live
pub async fn liveness() -> impl IntoResponse {
    Json(json!({ "status": "alive" }))
}

/// GET /health/ready. Readiness is a live round trip to the store.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    match state.catalog.all_roles().await {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        Err(e) => {
            tracing::warn!("readiness check failed: {:?}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}
