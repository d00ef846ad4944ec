//! LLM module - upstream completion clients

mod chain;
mod client;
mod factory;
mod http_error;
mod mock_client;
mod openai;
mod sse;

pub use chain::{
    ChainOutcome, DEFAULT_FALLBACK_RESPONSE, EMPTY_COMPLETION_RESPONSE, FALLBACK_MODEL, ModelChain,
};
pub use client::{
    CompletionRequest, CompletionResponse, EventStream, FinishReason, LlmClient, Message, Role,
    TokenUsage, UpstreamEvent,
};
pub use factory::{ClientSpec, LlmProvider, create_client};
pub use mock_client::{MockLlmClient, MockStats, MockStep, MockStepKind};
pub use openai::{DEFAULT_BASE_URL, DEFAULT_MODEL, OpenAIClient, WireApi};
pub use sse::{SseDecoder, SseFrame};
