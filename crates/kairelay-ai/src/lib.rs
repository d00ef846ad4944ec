//! KaiRelay AI - upstream completion clients
//!
//! This crate provides:
//! - The `LlmClient` abstraction over streaming and non-streaming completions
//! - An OpenAI-compatible client (Responses and Chat Completions APIs)
//! - Opaque upstream events decoded from the provider's event stream
//! - Ordered model candidates with a soft fallback
//! - A scripted mock client for demos and tests

pub mod error;
mod http_client;
pub mod llm;

// Re-export commonly used types
pub use error::{AiError, Result};
pub use llm::{
    ChainOutcome, ClientSpec, CompletionRequest, CompletionResponse, EventStream, LlmClient,
    LlmProvider, Message, MockLlmClient, MockStep, ModelChain, OpenAIClient, Role, TokenUsage,
    UpstreamEvent, WireApi, create_client,
};
