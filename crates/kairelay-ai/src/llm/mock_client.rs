//! Deterministic mock LLM client for demos and relay tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::{Duration, sleep};

use crate::error::{AiError, Result};

use super::{
    CompletionRequest, CompletionResponse, EventStream, FinishReason, LlmClient, TokenUsage,
    UpstreamEvent,
};

/// What a scripted stream step does.
#[derive(Debug, Clone)]
pub enum MockStepKind {
    /// Yield one upstream event.
    Event(UpstreamEvent),
    /// Yield a mid-stream error.
    Error(String),
    /// Never yield again until dropped.
    Stall,
    /// Only wait out the step delay.
    Pause,
}

/// Scripted stream step with optional delay.
#[derive(Debug, Clone)]
pub struct MockStep {
    pub delay_ms: u64,
    pub kind: MockStepKind,
}

impl MockStep {
    pub fn event(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            delay_ms: 0,
            kind: MockStepKind::Event(UpstreamEvent::new(kind, payload)),
        }
    }

    /// A `response.output_text.delta` event carrying `delta`.
    pub fn text_delta(delta: impl Into<String>) -> Self {
        Self::event("response.output_text.delta", json!({ "delta": delta.into() }))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            delay_ms: 0,
            kind: MockStepKind::Error(message.into()),
        }
    }

    pub fn stall() -> Self {
        Self {
            delay_ms: 0,
            kind: MockStepKind::Stall,
        }
    }

    pub fn pause(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            kind: MockStepKind::Pause,
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

/// Counters observed by tests and logged by the demo stream.
#[derive(Debug, Default)]
pub struct MockStats {
    streams_opened: AtomicUsize,
    streams_released: AtomicUsize,
    events_yielded: AtomicUsize,
    completions: AtomicUsize,
}

impl MockStats {
    /// Stream opens attempted, including ones that failed to connect.
    pub fn streams_opened(&self) -> usize {
        self.streams_opened.load(Ordering::SeqCst)
    }

    /// Streams dropped by their consumer, whether finished or not.
    pub fn streams_released(&self) -> usize {
        self.streams_released.load(Ordering::SeqCst)
    }

    pub fn events_yielded(&self) -> usize {
        self.events_yielded.load(Ordering::SeqCst)
    }

    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }
}

struct ReleaseGuard(Arc<MockStats>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.streams_released.fetch_add(1, Ordering::SeqCst);
    }
}

/// A deterministic mock LLM client driven by scripted steps.
///
/// Every call to `complete_stream` replays the same script from the start.
#[derive(Debug, Clone, Default)]
pub struct MockLlmClient {
    model: String,
    script: Arc<Vec<MockStep>>,
    connect_error: Option<String>,
    stalled_open: bool,
    completion_text: Option<String>,
    failing_models: Arc<HashSet<String>>,
    stats: Arc<MockStats>,
}

impl MockLlmClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn from_steps(model: impl Into<String>, steps: Vec<MockStep>) -> Self {
        Self {
            model: model.into(),
            script: Arc::new(steps),
            ..Default::default()
        }
    }

    /// Word-by-word greeting used by the relay test endpoint.
    pub fn demo(token_delay_ms: u64) -> Self {
        const WORDS: [&str; 12] = [
            "Hello", " world", ",", " this", " is", " a", " streaming", " test", ".",
            " Working", " now", "?",
        ];

        let mut steps: Vec<MockStep> = WORDS
            .iter()
            .map(|word| MockStep::text_delta(*word).with_delay(token_delay_ms))
            .collect();
        steps.push(MockStep::event("response.completed", json!({})));
        steps.push(MockStep::pause(token_delay_ms / 2));

        Self::from_steps("mock-demo", steps)
    }

    /// Fail every `complete_stream` call before any event is produced.
    pub fn with_connect_error(mut self, message: impl Into<String>) -> Self {
        self.connect_error = Some(message.into());
        self
    }

    /// Never finish opening a stream; the call stays pending until dropped.
    pub fn with_stalled_open(mut self) -> Self {
        self.stalled_open = true;
        self
    }

    /// Fixed text returned by `complete` instead of the echo.
    pub fn with_completion_text(mut self, text: impl Into<String>) -> Self {
        self.completion_text = Some(text.into());
        self
    }

    /// Make `complete` fail whenever one of these models is requested.
    pub fn with_failing_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing_models = Arc::new(models.into_iter().map(Into::into).collect());
        self
    }

    pub fn stats(&self) -> Arc<MockStats> {
        self.stats.clone()
    }

    fn usage_for(content_len: usize) -> TokenUsage {
        let completion_tokens = content_len as u32;
        TokenUsage {
            prompt_tokens: 1,
            completion_tokens,
            total_tokens: 1 + completion_tokens,
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.stats.completions.fetch_add(1, Ordering::SeqCst);
        let model = request.model_or(&self.model).to_string();

        if self.failing_models.contains(&model) {
            return Err(AiError::LlmHttp {
                provider: "mock".to_string(),
                status: 503,
                message: format!("model {model} unavailable"),
            });
        }

        let text = match &self.completion_text {
            Some(text) => text.clone(),
            None => request
                .last_user_message()
                .map(|msg| format!("mock-echo: {msg}"))
                .unwrap_or_else(|| "mock-ok".to_string()),
        };

        Ok(CompletionResponse {
            usage: Some(Self::usage_for(text.len())),
            content: Some(text),
            model,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn complete_stream(&self, _request: CompletionRequest) -> Result<EventStream> {
        self.stats.streams_opened.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = &self.connect_error {
            return Err(AiError::Connect(message.clone()));
        }
        if self.stalled_open {
            std::future::pending::<()>().await;
        }

        let script = self.script.clone();
        let stats = self.stats.clone();

        Ok(Box::pin(async_stream::stream! {
            let _guard = ReleaseGuard(stats.clone());

            for step in script.iter() {
                if step.delay_ms > 0 {
                    sleep(Duration::from_millis(step.delay_ms)).await;
                }

                match &step.kind {
                    MockStepKind::Event(event) => {
                        stats.events_yielded.fetch_add(1, Ordering::SeqCst);
                        yield Ok(event.clone());
                    }
                    MockStepKind::Error(message) => {
                        yield Err(AiError::Stream(message.clone()));
                        return;
                    }
                    MockStepKind::Stall => {
                        std::future::pending::<()>().await;
                    }
                    MockStepKind::Pause => {}
                }
            }
        }))
    }
}
