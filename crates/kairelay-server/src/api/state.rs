use std::sync::Arc;

use kairelay_ai::{LlmClient, MockLlmClient, ModelChain, create_client};

use crate::config::ServerConfig;
use crate::relay::{RelayConfig, StreamRelay};

/// Settings for the non-streaming completion endpoint.
#[derive(Debug, Clone)]
pub struct CompletionRoute {
    pub chain: ModelChain,
    pub instructions: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

/// Application state shared across all API handlers
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<dyn LlmClient>,
    pub relay: Arc<StreamRelay>,
    pub demo_relay: Arc<StreamRelay>,
    pub completion: Arc<CompletionRoute>,
}

impl AppState {
    pub fn new(
        upstream: Arc<dyn LlmClient>,
        relay: StreamRelay,
        demo_relay: StreamRelay,
        completion: CompletionRoute,
    ) -> Self {
        Self {
            upstream,
            relay: Arc::new(relay),
            demo_relay: Arc::new(demo_relay),
            completion: Arc::new(completion),
        }
    }

    /// Build the upstream client, relays and completion chain from config.
    pub fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        let upstream = create_client(&config.client_spec()?)?;
        Self::with_upstream(config, upstream)
    }

    /// Same as [`AppState::from_config`] with an already built upstream.
    pub fn with_upstream(
        config: &ServerConfig,
        upstream: Arc<dyn LlmClient>,
    ) -> anyhow::Result<Self> {
        let relay = StreamRelay::new(config.relay.to_relay_config()?, upstream.clone());

        let demo_client = MockLlmClient::demo(config.demo.token_delay_ms);
        let demo_config = RelayConfig::new(demo_client.model().to_string());
        let demo_relay = StreamRelay::new(demo_config, Arc::new(demo_client));

        let mut chain = ModelChain::new(config.completion.models.clone());
        if let Some(response) = &config.completion.fallback_response {
            chain = chain.with_fallback_response(response.clone());
        }
        let completion = CompletionRoute {
            chain,
            instructions: Some(config.completion.instructions.clone())
                .filter(|text| !text.is_empty()),
            max_tokens: config.completion.max_tokens,
            temperature: config.completion.temperature,
        };

        Ok(Self::new(upstream, relay, demo_relay, completion))
    }
}
