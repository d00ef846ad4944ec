//! Error types for upstream completion clients

use thiserror::Error;

/// Upstream client error types
#[derive(Error, Debug)]
pub enum AiError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("{provider} API error ({status}): {message}")]
    LlmHttp {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Invalid response format: {0}")]
    InvalidFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AiError {
    /// HTTP status reported by the upstream, when the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            AiError::LlmHttp { status, .. } => Some(*status),
            AiError::Http(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}

/// Result type alias for upstream operations
pub type Result<T> = std::result::Result<T, AiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_http_display_includes_status() {
        let error = AiError::LlmHttp {
            provider: "OpenAI".to_string(),
            status: 429,
            message: "rate limit".to_string(),
        };
        assert_eq!(error.to_string(), "OpenAI API error (429): rate limit");
        assert_eq!(error.status(), Some(429));
    }

    #[test]
    fn test_plain_errors_have_no_status() {
        assert_eq!(AiError::Stream("reset".to_string()).status(), None);
        assert_eq!(AiError::Connect("refused".to_string()).status(), None);
    }
}
