//! LLM client factory for building the configured upstream

use std::str::FromStr;
use std::sync::Arc;

use crate::error::{AiError, Result};
use crate::llm::{LlmClient, MockLlmClient, OpenAIClient, WireApi};

const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LlmProvider {
    OpenAI,
    DeepSeek,
    Mock,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::DeepSeek => "deepseek",
            Self::Mock => "mock",
        }
    }

    /// Environment variable consulted when no key is configured.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Self::OpenAI => Some("OPENAI_API_KEY"),
            Self::DeepSeek => Some("DEEPSEEK_API_KEY"),
            Self::Mock => None,
        }
    }
}

impl FromStr for LlmProvider {
    type Err = AiError;

    fn from_str(value: &str) -> Result<Self> {
        let normalized: String = value
            .trim()
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "openai" | "gpt" => Ok(Self::OpenAI),
            "deepseek" => Ok(Self::DeepSeek),
            "mock" => Ok(Self::Mock),
            _ => Err(AiError::Config(format!(
                "Unknown upstream provider: {value}. Available: openai, deepseek, mock"
            ))),
        }
    }
}

/// Everything needed to build one upstream client.
#[derive(Debug, Clone)]
pub struct ClientSpec {
    pub provider: LlmProvider,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub organization: Option<String>,
    pub api: WireApi,
}

impl ClientSpec {
    pub fn new(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            api_key: None,
            base_url: None,
            organization: None,
            api: WireApi::default(),
        }
    }

    fn resolve_api_key(&self) -> Result<String> {
        if let Some(key) = self.api_key.as_ref().filter(|key| !key.trim().is_empty()) {
            return Ok(key.clone());
        }

        let env_name = self.provider.api_key_env().unwrap_or_default();
        std::env::var(env_name)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                AiError::Config(format!(
                    "{} API key not configured. Set {} or upstream.api_key",
                    self.provider.as_str(),
                    env_name
                ))
            })
    }
}

/// Build the upstream client described by `spec`.
pub fn create_client(spec: &ClientSpec) -> Result<Arc<dyn LlmClient>> {
    match spec.provider {
        LlmProvider::Mock => Ok(Arc::new(MockLlmClient::new(spec.model.clone()))),
        LlmProvider::OpenAI => {
            let key = spec.resolve_api_key()?;
            let organization = spec
                .organization
                .clone()
                .or_else(|| std::env::var("OPENAI_ORG_ID").ok());
            let client = OpenAIClient::new(key)
                .with_model(spec.model.clone())
                .with_base_url(spec.base_url.as_deref().unwrap_or(super::openai::DEFAULT_BASE_URL))
                .with_organization(organization)
                .with_api(spec.api);
            Ok(Arc::new(client))
        }
        LlmProvider::DeepSeek => {
            let key = spec.resolve_api_key()?;
            let client = OpenAIClient::new(key)
                .with_model(spec.model.clone())
                .with_base_url(spec.base_url.as_deref().unwrap_or(DEEPSEEK_BASE_URL))
                .with_api(WireApi::ChatCompletions)
                .with_provider_name("deepseek");
            Ok(Arc::new(client))
        }
    }
}
