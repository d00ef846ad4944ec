//! Ordered model candidates with a soft fallback once all of them fail.

use serde::Serialize;

use super::{CompletionRequest, LlmClient, TokenUsage};

/// Model name reported when no candidate produced a response.
pub const FALLBACK_MODEL: &str = "fallback";

pub const DEFAULT_FALLBACK_RESPONSE: &str = "I'm experiencing some technical difficulties right now. \
This is a fallback response to let you know that the service is reachable, but there might be an \
issue with the AI provider or rate limits. Please try again in a few moments.";

pub const EMPTY_COMPLETION_RESPONSE: &str = "I'm sorry, I couldn't generate a response.";

/// Result of running a request through a [`ModelChain`]. Never an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainOutcome {
    pub response: String,
    /// Candidate that answered, or [`FALLBACK_MODEL`].
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Last candidate error, only set on the fallback path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChainOutcome {
    pub fn is_fallback(&self) -> bool {
        self.model == FALLBACK_MODEL
    }
}

/// Tries each candidate model once, in order, without delay between
/// attempts. The first success wins.
#[derive(Debug, Clone)]
pub struct ModelChain {
    candidates: Vec<String>,
    fallback_response: String,
}

impl ModelChain {
    pub fn new(candidates: Vec<String>) -> Self {
        Self {
            candidates,
            fallback_response: DEFAULT_FALLBACK_RESPONSE.to_string(),
        }
    }

    pub fn with_fallback_response(mut self, response: impl Into<String>) -> Self {
        self.fallback_response = response.into();
        self
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub async fn complete(&self, client: &dyn LlmClient, request: CompletionRequest) -> ChainOutcome {
        let mut last_error = None;

        for (attempt, model) in self.candidates.iter().enumerate() {
            tracing::debug!(model = %model, attempt = attempt + 1, "Trying candidate model");

            match client.complete(request.clone().with_model(model.clone())).await {
                Ok(response) => {
                    tracing::info!(model = %model, "Candidate model answered");
                    let text = response
                        .content
                        .filter(|content| !content.is_empty())
                        .unwrap_or_else(|| EMPTY_COMPLETION_RESPONSE.to_string());

                    return ChainOutcome {
                        response: text,
                        model: model.clone(),
                        usage: response.usage,
                        error: None,
                    };
                }
                Err(e) => {
                    tracing::warn!(model = %model, error = %e, "Candidate model failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        tracing::error!(
            candidates = self.candidates.len(),
            last_error = last_error.as_deref().unwrap_or("none"),
            "All candidate models failed, answering with fallback"
        );

        ChainOutcome {
            response: self.fallback_response.clone(),
            model: FALLBACK_MODEL.to_string(),
            usage: None,
            error: Some(
                last_error.unwrap_or_else(|| "No candidate models configured".to_string()),
            ),
        }
    }
}
