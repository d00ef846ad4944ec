pub mod completion;
pub mod health;
pub mod relay;
pub mod response;
pub mod state;

pub use response::ApiError;
pub use state::{AppState, CompletionRoute};

use axum::{
    Router,
    http::{Method, header},
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

/// All HTTP routes with CORS applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health::health))
        // Streaming relay
        .route("/api/relay", post(relay::relay_message))
        .route(
            "/api/relay/test",
            get(relay::test_stream).post(relay::test_stream_post),
        )
        // Ordered-candidate completion
        .route("/api/completion", post(completion::complete_with_fallback))
        .route("/api/upstream/health", get(health::upstream_health))
        .layer(cors)
        .with_state(state)
}
