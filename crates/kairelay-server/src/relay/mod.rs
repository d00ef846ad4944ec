//! Stream relay: one upstream event stream republished as SSE.
//!
//! A request moves through validation, upstream open and streaming. Each
//! request gets its own producer task; nothing is shared between requests
//! beyond the read-only [`RelayConfig`] and the upstream client handle.

mod frame;
mod pump;

pub use frame::{DONE_FRAME, done_frame, encode_event};
pub use pump::{Frame, RelayOutcome, pump, spawn_pump};

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderName, StatusCode, header},
    response::{IntoResponse, Response},
};
use kairelay_ai::{AiError, CompletionRequest, EventStream, LlmClient, UpstreamEvent};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use crate::api::response::ApiError;

pub const DEFAULT_FALLBACK_MESSAGE: &str = "I'm sorry, I'm having trouble reaching the assistant \
right now. Please try again in a few moments.";

/// Errors at the relay boundary.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Message is required")]
    InvalidRequest,

    #[error("Upstream connection failed: {0}")]
    UpstreamConnect(#[source] AiError),

    #[error("Upstream stream failed: {0}")]
    UpstreamStream(#[source] AiError),

    #[error("No upstream event received for {0:?}")]
    IdleTimeout(Duration),

    #[error("Upstream did not answer within {0:?}")]
    OpenTimeout(Duration),

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<RelayError> for ApiError {
    fn from(error: RelayError) -> Self {
        match error {
            RelayError::InvalidRequest => ApiError::bad_request(error.to_string()),
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

/// What an endpoint answers when the upstream cannot be opened at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectFailurePolicy {
    /// HTTP 500 with a JSON error body.
    #[default]
    Reject,
    /// HTTP 200 stream with one apology event and `[DONE]`.
    Degrade,
}

impl FromStr for ConnectFailurePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "degrade" => Ok(Self::Degrade),
            other => Err(format!(
                "Unknown connect failure policy '{other}'. Available: reject, degrade"
            )),
        }
    }
}

/// Read-only settings for one relay endpoint, built once at startup.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub model: String,
    pub instructions: Option<String>,
    pub idle_timeout: Option<Duration>,
    /// Limit on opening the upstream, up to its response headers.
    pub open_timeout: Option<Duration>,
    pub on_connect_failure: ConnectFailurePolicy,
    pub fallback_message: String,
}

impl RelayConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            instructions: None,
            idle_timeout: None,
            open_timeout: None,
            on_connect_failure: ConnectFailurePolicy::default(),
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
        }
    }

    pub fn with_instructions(mut self, instructions: Option<String>) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_open_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_connect_failure_policy(mut self, policy: ConnectFailurePolicy) -> Self {
        self.on_connect_failure = policy;
        self
    }

    pub fn with_fallback_message(mut self, message: impl Into<String>) -> Self {
        self.fallback_message = message.into();
        self
    }
}

/// Extract a non-empty `message` string from a raw JSON body.
pub fn parse_message(body: &[u8]) -> Result<String, RelayError> {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| value.get("message")?.as_str().map(str::to_owned))
        .filter(|message| !message.is_empty())
        .ok_or(RelayError::InvalidRequest)
}

/// Bridges one upstream completion stream to one SSE response.
pub struct StreamRelay {
    config: RelayConfig,
    client: Arc<dyn LlmClient>,
}

impl StreamRelay {
    pub fn new(config: RelayConfig, client: Arc<dyn LlmClient>) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Validate a raw request body and relay it.
    pub async fn handle_request(&self, body: &[u8]) -> Response {
        match parse_message(body) {
            Ok(message) => self.relay_message(message).await,
            Err(err) => {
                tracing::debug!("Rejected relay request without a message");
                err.into_response()
            }
        }
    }

    /// Open the upstream for `message` and stream it back as SSE.
    pub async fn relay_message(&self, message: String) -> Response {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "relay",
            %request_id,
            provider = self.client.provider(),
            model = %self.config.model,
        );

        match self.open(message).instrument(span.clone()).await {
            Ok(upstream) => sse_response(spawn_pump(upstream, self.config.idle_timeout, span)),
            Err(err) => match self.config.on_connect_failure {
                ConnectFailurePolicy::Reject => {
                    span.in_scope(|| tracing::error!(error = %err, "Upstream open failed"));
                    err.into_response()
                }
                ConnectFailurePolicy::Degrade => {
                    span.in_scope(|| {
                        tracing::warn!(error = %err, "Upstream open failed, streaming fallback")
                    });
                    let apology = apology_stream(&self.config.fallback_message);
                    sse_response(spawn_pump(apology, None, span))
                }
            },
        }
    }

    async fn open(&self, message: String) -> Result<EventStream, RelayError> {
        tracing::debug!(message_len = message.len(), "Opening upstream stream");

        let request = CompletionRequest::user(message)
            .with_model(self.config.model.clone())
            .with_instructions(self.config.instructions.clone());
        let opening = self.client.complete_stream(request);

        let opened = match self.config.open_timeout {
            Some(limit) => tokio::time::timeout(limit, opening)
                .await
                .map_err(|_| RelayError::OpenTimeout(limit))?,
            None => opening.await,
        };
        opened.map_err(RelayError::UpstreamConnect)
    }
}

fn apology_stream(message: &str) -> EventStream {
    let event = UpstreamEvent::new("response.output_text.delta", json!({ "delta": message }));
    Box::pin(futures::stream::iter([Ok(event)]))
}

fn sse_response(frames: tokio_stream::wrappers::ReceiverStream<Frame>) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (header::CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}
