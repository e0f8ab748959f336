//! Domain-specific error types for dual-ai

use thiserror::Error;

use crate::clients::ProviderError;

/// Main error type for the dual-ai workflow
#[derive(Error, Debug)]
pub enum DualAiError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Generation failed: {message}")]
    Generation { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Workflow error [trace={trace_id} request={request_id}]: {message}")]
    Workflow {
        message: String,
        trace_id: String,
        request_id: String,
    },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Timeout error: {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DualAiError {
    /// Wrap any error into a workflow-level error carrying trace context
    pub fn workflow(
        err: impl std::fmt::Display,
        trace_id: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        DualAiError::Workflow {
            message: err.to_string(),
            trace_id: trace_id.into(),
            request_id: request_id.into(),
        }
    }
}

impl From<anyhow::Error> for DualAiError {
    fn from(err: anyhow::Error) -> Self {
        DualAiError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for DualAiError {
    fn from(err: serde_json::Error) -> Self {
        DualAiError::Serialization {
            message: err.to_string(),
        }
    }
}

// The client's configured timeout is not recoverable from the error, so
// timeouts stay provider errors instead of `Timeout`.
impl From<reqwest::Error> for DualAiError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "HTTP request timed out"
        } else {
            "HTTP request failed"
        };
        DualAiError::Provider {
            message: format!("{}: {}", kind, err),
        }
    }
}

impl From<rusqlite::Error> for DualAiError {
    fn from(err: rusqlite::Error) -> Self {
        DualAiError::Storage {
            message: err.to_string(),
        }
    }
}

impl From<ProviderError> for DualAiError {
    fn from(err: ProviderError) -> Self {
        DualAiError::Provider {
            message: err.to_string(),
        }
    }
}

/// Result type alias for dual-ai operations
pub type Result<T> = std::result::Result<T, DualAiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_error_carries_trace_context() {
        let err = DualAiError::workflow("boom", "trace-1", "req-9");
        let rendered = err.to_string();
        assert!(rendered.contains("trace-1"));
        assert!(rendered.contains("req-9"));
        assert!(rendered.contains("boom"));
    }

    #[tokio::test]
    async fn reqwest_timeout_does_not_report_a_zero_budget() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _accept = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        });
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(50))
            .build()
            .unwrap();
        let err = client
            .get(format!("http://{}/", addr))
            .send()
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let converted: DualAiError = err.into();
        match converted {
            DualAiError::Provider { message } => {
                assert!(message.starts_with("HTTP request timed out"));
                assert!(!message.contains("0ms"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn provider_error_converts() {
        let err: DualAiError = ProviderError::RateLimited("slow down".into()).into();
        assert!(matches!(err, DualAiError::Provider { .. }));
    }
}
