//! The `LlmClient` trait and its request/response types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Sampling options for a single completion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Sampling temperature
    pub temperature: f32,
    /// Upper bound on generated tokens
    pub max_tokens: u32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 512,
        }
    }
}

impl GenerateOptions {
    /// Create options with explicit temperature and token limit
    pub fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
        }
    }
}

/// Chat-style completion result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Assistant text
    pub content: String,
}

impl ChatResponse {
    /// Wrap a completion text
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Description of the model behind a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Provider name (e.g. "openai-compatible", "scripted")
    pub provider: String,
    /// Model identifier sent to the backend
    pub model: String,
}

/// A text-completion backend
///
/// Implementations must be thread-safe (Send + Sync) as they are shared
/// across spawned tasks. Timeouts are the implementation's concern.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete `prompt` with explicit sampling options
    async fn generate(&self, prompt: &str, options: GenerateOptions) -> Result<String>;

    /// Chat-style single-turn call with the client's default options
    async fn invoke(&self, prompt: &str) -> Result<ChatResponse> {
        let content = self.generate(prompt, GenerateOptions::default()).await?;
        Ok(ChatResponse { content })
    }

    /// Describe the backing model
    fn model_info(&self) -> ModelInfo;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_options_default() {
        let options = GenerateOptions::default();
        assert_eq!(options.temperature, 0.7);
        assert_eq!(options.max_tokens, 512);
    }

    #[test]
    fn test_chat_response_serde() {
        let response = ChatResponse::new("hello");
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"content":"hello"}"#);
    }
}
