//! Error types for the LLM client layer
//!
//! Every backend maps its failures onto [`LlmError`] so callers can decide
//! whether to retry (`is_recoverable`) or fall back to a safe default.

use thiserror::Error;

/// Main error type for LLM calls
#[derive(Error, Debug)]
pub enum LlmError {
    /// The HTTP request could not be sent or the body could not be read
    #[error("HTTP error: {0}")]
    Http(String),

    /// The backend answered with a non-success status
    #[error("LLM backend returned {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error body or reason phrase
        message: String,
    },

    /// Timeout waiting for a completion
    #[error("Timeout waiting for completion after {seconds} seconds")]
    Timeout {
        /// Number of seconds waited before timeout
        seconds: u64,
    },

    /// The backend answered but produced no text
    #[error("LLM returned an empty completion")]
    EmptyResponse,

    /// The completion could not be interpreted
    #[error("Failed to parse completion: {error}\nRaw completion: {raw}")]
    Parse {
        /// Parse error description
        error: String,
        /// Raw completion that failed to parse
        raw: String,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid client configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Any other backend failure (scripted clients, adapters)
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type alias for LLM operations
pub type Result<T> = std::result::Result<T, LlmError>;

impl LlmError {
    /// Create a new Parse error
    pub fn parse_error(error: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Parse {
            error: error.into(),
            raw: raw.into(),
        }
    }

    /// Create a new Timeout error
    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout { seconds }
    }

    /// Create a new Api error
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a new Backend error
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Check if the error is worth retrying
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Http(_) | Self::EmptyResponse | Self::Backend(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Check if the error is a configuration issue
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LlmError::api(503, "overloaded");
        let msg = err.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("overloaded"));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(LlmError::timeout(30).is_recoverable());
        assert!(LlmError::api(429, "slow down").is_recoverable());
        assert!(LlmError::api(500, "boom").is_recoverable());
        assert!(!LlmError::api(401, "unauthorized").is_recoverable());
        assert!(!LlmError::Config("missing model".into()).is_recoverable());
        assert!(!LlmError::parse_error("not a number", "abc").is_recoverable());
    }

    #[test]
    fn test_is_config_error() {
        assert!(LlmError::Config("test".into()).is_config_error());
        assert!(!LlmError::timeout(30).is_config_error());
    }

    #[test]
    fn test_json_error_conversion() {
        let original = serde_json::from_str::<serde_json::Value>("{\"broken\": ").unwrap_err();
        let err: LlmError = original.into();
        assert!(err.to_string().starts_with("JSON error"));
    }
}
