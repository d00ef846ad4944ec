//! LLM client trait and types

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Chat message role
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One event produced by an upstream streaming completion.
///
/// The kind is whatever tag the upstream put on the event and the payload is
/// kept as raw JSON. Callers forward both without inspecting them, so new
/// upstream event kinds pass through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamEvent {
    pub kind: String,
    pub payload: Value,
}

impl UpstreamEvent {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Build an event from a decoded upstream frame.
    ///
    /// The tag is taken from the payload's `type` field, then the frame's SSE
    /// `event:` field, then the payload's `object` field, then `"message"`.
    pub fn from_frame(sse_event: Option<&str>, payload: Value) -> Self {
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .or(sse_event)
            .or_else(|| payload.get("object").and_then(Value::as_str))
            .unwrap_or("message")
            .to_string();

        Self { kind, payload }
    }
}

/// Lazily produced upstream events. Dropping the stream releases the
/// underlying connection.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<UpstreamEvent>> + Send>>;

/// LLM completion response
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: Option<String>,
    /// Model that actually served the request.
    pub model: String,
    pub finish_reason: FinishReason,
    pub usage: Option<TokenUsage>,
}

/// Reason for completion
#[derive(Debug, Clone, PartialEq)]
pub enum FinishReason {
    Stop,
    MaxTokens,
    ContentFilter,
    Error,
}

impl FinishReason {
    pub fn from_api(value: &str) -> Self {
        match value {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::MaxTokens,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Error,
        }
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// LLM completion request
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// Overrides the client's default model when set.
    pub model: Option<String>,
    /// System instructions sent ahead of the conversation.
    pub instructions: Option<String>,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Create a new completion request
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Request for a single user message
    pub fn user(message: impl Into<String>) -> Self {
        Self::new(vec![Message::user(message)])
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_instructions(mut self, instructions: Option<String>) -> Self {
        self.instructions = instructions;
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    /// Model for this request, falling back to the client's default.
    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(default)
    }

    /// Last user message, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|msg| msg.role == Role::User)
            .map(|msg| msg.content.as_str())
    }
}

/// LLM client trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Get provider name
    fn provider(&self) -> &str;

    /// Get model name
    fn model(&self) -> &str;

    /// Complete a chat request without streaming
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Open a streaming completion.
    ///
    /// An `Err` here means nothing was streamed at all; failures after the
    /// stream is handed out arrive as `Err` items on the stream itself.
    async fn complete_stream(&self, request: CompletionRequest) -> Result<EventStream>;

    /// Check that the upstream is reachable and the credentials are accepted.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
