use axum::{body::Bytes, extract::State, response::Response};
use serde_json::Value;

use super::state::AppState;

const DEMO_PROMPT: &str = "Streaming test";

// POST /api/relay
pub async fn relay_message(State(state): State<AppState>, body: Bytes) -> Response {
    state.relay.handle_request(&body).await
}

// GET /api/relay/test
pub async fn test_stream(State(state): State<AppState>) -> Response {
    state.demo_relay.relay_message(DEMO_PROMPT.to_string()).await
}

// POST /api/relay/test
pub async fn test_stream_post(State(state): State<AppState>, body: Bytes) -> Response {
    if let Ok(payload) = serde_json::from_slice::<Value>(&body) {
        tracing::debug!(%payload, "Test stream request body");
    }
    state.demo_relay.relay_message(DEMO_PROMPT.to_string()).await
}
