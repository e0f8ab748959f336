pub mod anthropic;
pub mod openai;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::error::{DualAiError, Result};

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;
pub use traits::{
    ChatCompletion, ChatMessage, ChatProvider, ChatRequest, ChatRole, ProviderError, TokenUsage,
};

/// Hosted model vendors the workflow can talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    #[serde(alias = "open_ai")]
    OpenAi,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

/// Build a provider for `kind`, failing early when its API key is missing
pub fn create_provider(
    kind: ProviderKind,
    model: &str,
    runtime: &RuntimeConfig,
) -> Result<Arc<dyn ChatProvider>> {
    let http = build_http_client(runtime.http_timeout_ms)?;
    match kind {
        ProviderKind::Anthropic => {
            let key = runtime
                .anthropic_api_key
                .clone()
                .ok_or_else(|| DualAiError::Config {
                    message: "ANTHROPIC_API_KEY is not set".into(),
                })?;
            Ok(Arc::new(AnthropicClient::new(
                http,
                key,
                model.to_string(),
                runtime.anthropic_base_url.clone(),
            )))
        }
        ProviderKind::OpenAi => {
            let key = runtime
                .openai_api_key
                .clone()
                .ok_or_else(|| DualAiError::Config {
                    message: "OPENAI_API_KEY is not set".into(),
                })?;
            Ok(Arc::new(OpenAiClient::new(
                http,
                key,
                model.to_string(),
                runtime.openai_base_url.clone(),
            )))
        }
    }
}

pub(crate) fn build_http_client(timeout_ms: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .map_err(|e| DualAiError::Internal {
            message: format!("Failed to build HTTP client: {}", e),
        })
}

/// Map a non-success status to the matching provider error
pub(crate) fn classify_http_status(status: u16, body: &str) -> ProviderError {
    let body = truncate_snippet(body.trim(), 500);
    match status {
        401 | 403 => ProviderError::Auth(body),
        429 => ProviderError::RateLimited(body),
        _ => ProviderError::Http { status, body },
    }
}

pub(crate) fn map_transport_err(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Transport(format!("request timed out: {}", err))
    } else {
        ProviderError::Transport(err.to_string())
    }
}

pub(crate) fn truncate_snippet(input: &str, max: usize) -> String {
    if input.len() <= max {
        return input.to_string();
    }
    let mut end = max;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &input[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(classify_http_status(401, "no"), ProviderError::Auth(_)));
        assert!(matches!(
            classify_http_status(429, "quota"),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            classify_http_status(500, "oops"),
            ProviderError::Http { status: 500, .. }
        ));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "héllo wörld";
        let out = truncate_snippet(s, 2);
        assert!(out.ends_with("..."));
        assert_eq!(truncate_snippet("short", 10), "short");
    }

    #[test]
    fn provider_kind_parses_from_config_strings() {
        let kind: ProviderKind = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(kind, ProviderKind::OpenAi);
        let kind: ProviderKind = serde_json::from_str("\"anthropic\"").unwrap();
        assert_eq!(kind, ProviderKind::Anthropic);
    }

    #[test]
    fn missing_key_is_config_error() {
        let runtime = RuntimeConfig {
            anthropic_api_key: None,
            ..RuntimeConfig::default()
        };
        let err = create_provider(ProviderKind::Anthropic, "claude-sonnet-4-5", &runtime)
            .err()
            .unwrap();
        assert!(matches!(err, DualAiError::Config { .. }));
    }
}
