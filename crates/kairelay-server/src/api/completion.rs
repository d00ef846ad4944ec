use axum::{Json, body::Bytes, extract::State};
use kairelay_ai::{ChainOutcome, CompletionRequest};

use super::response::ApiError;
use super::state::AppState;
use crate::relay::parse_message;

// POST /api/completion
pub async fn complete_with_fallback(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ChainOutcome>, ApiError> {
    let message = parse_message(&body)?;
    let route = &state.completion;

    let mut request = CompletionRequest::user(message)
        .with_instructions(route.instructions.clone())
        .with_max_tokens(route.max_tokens);
    if let Some(temperature) = route.temperature {
        request = request.with_temperature(temperature);
    }

    let outcome = route.chain.complete(state.upstream.as_ref(), request).await;
    Ok(Json(outcome))
}
