//! Error types for the agentwire domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all agentwire operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- History errors ---
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The client went away; no further events can be delivered.
    #[error("Request cancelled")]
    Cancelled,

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Machine-readable code reported to clients in error events.
    pub fn code(&self) -> Option<String> {
        match self {
            Error::Provider(ProviderError::Upstream { code, .. }) => code.clone(),
            Error::Provider(ProviderError::ApiError { status_code, .. }) => {
                Some(status_code.to_string())
            }
            Error::Provider(ProviderError::Timeout(_)) => Some("upstream_timeout".into()),
            Error::Provider(ProviderError::RateLimited { .. }) => Some("rate_limited".into()),
            Error::Provider(_) => Some("upstream_error".into()),
            Error::Cancelled => Some("cancelled".into()),
            _ => Some("internal_error".into()),
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    /// An explicit error object inside the event stream.
    #[error("Upstream reported an error: {message}")]
    Upstream {
        code: Option<String>,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("{reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timeout: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Clone, Error)]
pub enum HistoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt history record: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
        assert_eq!(err.code().as_deref(), Some("429"));
    }

    #[test]
    fn tool_timeout_mentions_timeout() {
        let err = ToolError::Timeout {
            tool_name: "searchWeb".into(),
            timeout_secs: 15,
        };
        assert!(err.to_string().to_lowercase().contains("timeout"));
        assert!(err.to_string().contains("searchWeb"));
    }

    #[test]
    fn execution_failure_displays_reason_only() {
        let err = ToolError::ExecutionFailed {
            tool_name: "calculate".into(),
            reason: "Syntax error: unexpected end of expression".into(),
        };
        assert_eq!(err.to_string(), "Syntax error: unexpected end of expression");
    }

    #[test]
    fn upstream_error_keeps_code() {
        let err = Error::from(ProviderError::Upstream {
            code: Some("10013".into()),
            message: "content blocked".into(),
        });
        assert_eq!(err.code().as_deref(), Some("10013"));
        assert!(err.to_string().contains("content blocked"));
    }
}
