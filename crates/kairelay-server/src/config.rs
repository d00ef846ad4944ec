use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use kairelay_ai::{ClientSpec, LlmProvider, WireApi};
use serde::Deserialize;

use crate::relay::{ConnectFailurePolicy, DEFAULT_FALLBACK_MESSAGE, RelayConfig};

const DEFAULT_CONFIG_FILE: &str = "server.toml";

const DEFAULT_RELAY_INSTRUCTIONS: &str =
    "You are a helpful assistant for Kellogg School of Management. Keep your responses brief.";

const DEFAULT_COMPLETION_INSTRUCTIONS: &str = "You are Kai, a helpful assistant for Kellogg \
School of Management students. Be concise and helpful.";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub completion: CompletionSettings,
    #[serde(default)]
    pub demo: DemoSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSection {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub api: WireApi,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            base_url: None,
            organization: None,
            api: WireApi::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelaySettings {
    #[serde(default = "default_relay_model")]
    pub model: String,
    /// Inline system prompt. Ignored when `instructions_path` is set.
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub instructions_path: Option<PathBuf>,
    /// Seconds without an upstream event before the stream is failed. 0 disables.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Seconds allowed for the upstream to answer the open request. 0 disables.
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,
    #[serde(default)]
    pub on_connect_failure: ConnectFailurePolicy,
    #[serde(default)]
    pub fallback_message: Option<String>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            model: default_relay_model(),
            instructions: None,
            instructions_path: None,
            idle_timeout_secs: default_idle_timeout_secs(),
            open_timeout_secs: default_open_timeout_secs(),
            on_connect_failure: ConnectFailurePolicy::default(),
            fallback_message: None,
        }
    }
}

impl RelaySettings {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn open_timeout(&self) -> Option<Duration> {
        (self.open_timeout_secs > 0).then(|| Duration::from_secs(self.open_timeout_secs))
    }

    /// Resolve the system prompt. A configured file is read exactly once, here.
    pub fn load_instructions(&self) -> anyhow::Result<String> {
        if let Some(path) = &self.instructions_path {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read instructions {}", path.display()))?;
            return Ok(contents.trim_end().to_string());
        }

        Ok(self
            .instructions
            .clone()
            .unwrap_or_else(|| DEFAULT_RELAY_INSTRUCTIONS.to_string()))
    }

    pub fn to_relay_config(&self) -> anyhow::Result<RelayConfig> {
        let instructions = self.load_instructions()?;
        Ok(RelayConfig::new(self.model.clone())
            .with_instructions(Some(instructions).filter(|text| !text.is_empty()))
            .with_idle_timeout(self.idle_timeout())
            .with_open_timeout(self.open_timeout())
            .with_connect_failure_policy(self.on_connect_failure)
            .with_fallback_message(
                self.fallback_message
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FALLBACK_MESSAGE.to_string()),
            ))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionSettings {
    #[serde(default = "default_completion_models")]
    pub models: Vec<String>,
    #[serde(default = "default_completion_instructions")]
    pub instructions: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub fallback_response: Option<String>,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            models: default_completion_models(),
            instructions: default_completion_instructions(),
            max_tokens: default_max_tokens(),
            temperature: None,
            fallback_response: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DemoSettings {
    #[serde(default = "default_token_delay_ms")]
    pub token_delay_ms: u64,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            token_delay_ms: default_token_delay_ms(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_relay_model() -> String {
    "gpt-4o".to_string()
}

fn default_idle_timeout_secs() -> u64 {
    60
}

fn default_open_timeout_secs() -> u64 {
    30
}

fn default_completion_models() -> Vec<String> {
    vec!["gpt-3.5-turbo".to_string(), "gpt-3.5-turbo-16k".to_string()]
}

fn default_completion_instructions() -> String {
    DEFAULT_COMPLETION_INSTRUCTIONS.to_string()
}

fn default_max_tokens() -> u32 {
    500
}

fn default_token_delay_ms() -> u64 {
    200
}

impl ServerConfig {
    pub fn load() -> anyhow::Result<Self> {
        if let Some(path) = config_path() {
            return Self::from_file(&path);
        }

        Self::from_env()
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from `KAIRELAY_*` variables, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("KAIRELAY_SERVER_HOST") {
            config.server.host = host;
        }
        if let Some(port) = parse_var(&lookup, "KAIRELAY_SERVER_PORT")? {
            config.server.port = port;
        }
        if let Some(format) = lookup("KAIRELAY_LOG_FORMAT") {
            config.logging.format = match format.trim().to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Text,
            };
        }

        if let Some(provider) = lookup("KAIRELAY_UPSTREAM_PROVIDER") {
            config.upstream.provider = provider;
        }
        config.upstream.base_url = lookup("KAIRELAY_UPSTREAM_BASE_URL");
        if let Some(api) = lookup("KAIRELAY_UPSTREAM_API") {
            config.upstream.api = api
                .parse::<WireApi>()
                .map_err(|err| anyhow::anyhow!("KAIRELAY_UPSTREAM_API: {err}"))?;
        }

        if let Some(model) = lookup("KAIRELAY_RELAY_MODEL") {
            config.relay.model = model;
        }
        config.relay.instructions_path = lookup("KAIRELAY_RELAY_INSTRUCTIONS_PATH").map(PathBuf::from);
        if let Some(secs) = parse_var(&lookup, "KAIRELAY_RELAY_IDLE_TIMEOUT_SECS")? {
            config.relay.idle_timeout_secs = secs;
        }
        if let Some(secs) = parse_var(&lookup, "KAIRELAY_RELAY_OPEN_TIMEOUT_SECS")? {
            config.relay.open_timeout_secs = secs;
        }
        if let Some(policy) = lookup("KAIRELAY_RELAY_ON_CONNECT_FAILURE") {
            config.relay.on_connect_failure = policy
                .parse::<ConnectFailurePolicy>()
                .map_err(|err| anyhow::anyhow!("KAIRELAY_RELAY_ON_CONNECT_FAILURE: {err}"))?;
        }

        if let Some(models) = lookup("KAIRELAY_COMPLETION_MODELS") {
            config.completion.models = models
                .split(',')
                .map(str::trim)
                .filter(|model| !model.is_empty())
                .map(str::to_string)
                .collect();
        }

        Ok(config)
    }

    /// Upstream client description. The relay model doubles as the client default.
    pub fn client_spec(&self) -> anyhow::Result<ClientSpec> {
        let provider = self.upstream.provider.parse::<LlmProvider>()?;
        let mut spec = ClientSpec::new(provider, self.relay.model.clone());
        spec.api_key = self.upstream.api_key.clone();
        spec.base_url = self.upstream.base_url.clone();
        spec.organization = self.upstream.organization.clone();
        spec.api = self.upstream.api;
        Ok(spec)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> anyhow::Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|err| anyhow::anyhow!("{key}: invalid value '{value}': {err}"))
        })
        .transpose()
}

fn config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("KAIRELAY_SERVER_CONFIG") {
        return Some(PathBuf::from(path));
    }

    Path::new(DEFAULT_CONFIG_FILE)
        .exists()
        .then(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}
