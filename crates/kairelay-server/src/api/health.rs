use axum::{Json, extract::State};
use serde_json::{Value, json};

use super::response::ApiError;
use super::state::AppState;

// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// GET /api/upstream/health
pub async fn upstream_health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let upstream = &state.upstream;

    match upstream.health_check().await {
        Ok(()) => Ok(Json(json!({
            "success": true,
            "provider": upstream.provider(),
            "model": upstream.model(),
        }))),
        Err(e) => {
            tracing::warn!(provider = upstream.provider(), error = %e, "Upstream health check failed");
            Err(ApiError::bad_gateway(e.to_string()))
        }
    }
}
