//! OpenAI-compatible LLM provider

use std::str::FromStr;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AiError, Result};
use crate::http_client::build_http_client;
use crate::llm::client::{
    CompletionRequest, CompletionResponse, EventStream, FinishReason, LlmClient, TokenUsage,
    UpstreamEvent,
};
use crate::llm::http_error::response_to_error;
use crate::llm::sse::{SseDecoder, SseFrame};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Which upstream endpoint streaming requests go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireApi {
    /// `POST /responses`, typed events such as `response.output_text.delta`.
    #[default]
    Responses,
    /// `POST /chat/completions`, `chat.completion.chunk` objects.
    ChatCompletions,
}

impl WireApi {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireApi::Responses => "responses",
            WireApi::ChatCompletions => "chat_completions",
        }
    }

    fn path(&self) -> &'static str {
        match self {
            WireApi::Responses => "responses",
            WireApi::ChatCompletions => "chat/completions",
        }
    }
}

impl FromStr for WireApi {
    type Err = AiError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "responses" => Ok(WireApi::Responses),
            "chat_completions" | "chat" => Ok(WireApi::ChatCompletions),
            other => Err(AiError::Config(format!(
                "Unknown upstream API '{other}'. Available: responses, chat_completions"
            ))),
        }
    }
}

/// OpenAI client
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    organization: Option<String>,
    api: WireApi,
    provider: &'static str,
}

impl OpenAIClient {
    /// Create a new OpenAI client
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: build_http_client(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            organization: None,
            api: WireApi::default(),
            provider: "openai",
        }
    }

    /// Set the model to use
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set custom base URL (for API-compatible services)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_organization(mut self, organization: Option<String>) -> Self {
        self.organization = organization.filter(|org| !org.trim().is_empty());
        self
    }

    pub fn with_api(mut self, api: WireApi) -> Self {
        self.api = api;
        self
    }

    /// Report a different provider name (OpenAI-compatible services).
    pub fn with_provider_name(mut self, provider: &'static str) -> Self {
        self.provider = provider;
        self
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");

        match &self.organization {
            Some(org) => builder.header("OpenAI-Organization", org),
            None => builder,
        }
    }

    fn stream_body(&self, model: &str, request: &CompletionRequest) -> Result<Value> {
        let body = match self.api {
            WireApi::Responses => serde_json::to_value(ResponsesRequest {
                model,
                instructions: request.instructions.as_deref(),
                input: request
                    .messages
                    .iter()
                    .map(|m| WireMessage {
                        role: m.role.as_str(),
                        content: &m.content,
                    })
                    .collect(),
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                stream: true,
            }),
            WireApi::ChatCompletions => {
                serde_json::to_value(chat_request(model, request, true))
            }
        };

        Ok(body?)
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
    input: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

fn chat_request<'a>(model: &'a str, request: &'a CompletionRequest, stream: bool) -> ChatRequest<'a> {
    let system = request.instructions.as_deref().map(|content| WireMessage {
        role: "system",
        content,
    });

    ChatRequest {
        model,
        messages: system
            .into_iter()
            .chain(request.messages.iter().map(|m| WireMessage {
                role: m.role.as_str(),
                content: &m.content,
            }))
            .collect(),
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        stream,
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

enum Decoded {
    Event(UpstreamEvent),
    Skip,
    Done,
}

fn decode_frame(frame: SseFrame) -> Result<Decoded> {
    let data = frame.data.trim();
    if data.is_empty() {
        return Ok(Decoded::Skip);
    }
    if data == "[DONE]" {
        return Ok(Decoded::Done);
    }

    let payload: Value = serde_json::from_str(data).map_err(|err| {
        AiError::InvalidFormat(format!("Undecodable upstream event: {err}"))
    })?;
    Ok(Decoded::Event(UpstreamEvent::from_frame(
        frame.event.as_deref(),
        payload,
    )))
}

#[async_trait]
impl LlmClient for OpenAIClient {
    fn provider(&self) -> &str {
        self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let model = request.model_or(&self.model).to_string();
        let body = chat_request(&model, &request, false);

        let response = self.post("chat/completions").json(&body).send().await?;
        if !response.status().is_success() {
            return Err(response_to_error(response, self.provider).await);
        }

        let data: ChatResponse = response.json().await?;
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AiError::Llm("No response from OpenAI".to_string()))?;

        Ok(CompletionResponse {
            content: choice.message.content,
            model: data.model.unwrap_or(model),
            finish_reason: choice
                .finish_reason
                .as_deref()
                .map(FinishReason::from_api)
                .unwrap_or(FinishReason::Stop),
            usage: data.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<EventStream> {
        let model = request.model_or(&self.model).to_string();
        let body = self.stream_body(&model, &request)?;

        let response = self
            .post(self.api.path())
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::Connect(e.to_string()))?;

        if !response.status().is_success() {
            return Err(response_to_error(response, self.provider).await);
        }

        tracing::debug!(model = %model, api = self.api.as_str(), "Upstream stream opened");

        let mut byte_stream = response.bytes_stream();
        Ok(Box::pin(async_stream::stream! {
            let mut decoder = SseDecoder::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(AiError::Stream(e.to_string()));
                        return;
                    }
                };

                let frames = match decoder.push(&chunk) {
                    Ok(frames) => frames,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                for frame in frames {
                    match decode_frame(frame) {
                        Ok(Decoded::Event(event)) => yield Ok(event),
                        Ok(Decoded::Skip) => {}
                        Ok(Decoded::Done) => return,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            // The last event may lack its blank-line terminator.
            if let Some(frame) = decoder.finish() {
                match decode_frame(frame) {
                    Ok(Decoded::Event(event)) => yield Ok(event),
                    Ok(Decoded::Skip) | Ok(Decoded::Done) => {}
                    Err(e) => yield Err(e),
                }
            }
        }))
    }

    async fn health_check(&self) -> Result<()> {
        let mut builder = self
            .client
            .get(format!("{}/models", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key));
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AiError::Connect(e.to_string()))?;
        if !response.status().is_success() {
            return Err(response_to_error(response, self.provider).await);
        }
        Ok(())
    }
}
