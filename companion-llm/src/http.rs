//! OpenAI-compatible chat completions client
//!
//! Works against any server exposing `POST {base_url}/v1/chat/completions`
//! (OpenAI, vLLM, Ollama, LM Studio).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::{ChatResponse, GenerateOptions, LlmClient, ModelInfo};
use crate::errors::{LlmError, Result};

/// Connection settings for [`OpenAiCompatibleClient`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// Server root, without the `/v1` suffix
    pub base_url: String,
    /// Model name sent with each request
    pub model: String,
    /// Bearer token, if the server requires one
    pub api_key: Option<String>,
    /// Request timeout
    pub timeout_seconds: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "qwen2.5:7b".to_string()),
            api_key: std::env::var("LLM_API_KEY").ok(),
            timeout_seconds: 60,
        }
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP client for OpenAI-style chat completion endpoints
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    config: HttpClientConfig,
}

impl OpenAiCompatibleClient {
    /// Build a client from its configuration
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        if config.model.trim().is_empty() {
            return Err(LlmError::Config("model name must not be empty".into()));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| LlmError::Config(e.to_string()))?;

        Ok(Self { http, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn map_send_error(&self, err: reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::timeout(self.config.timeout_seconds)
        } else {
            LlmError::Http(err.to_string())
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn generate(&self, prompt: &str, options: GenerateOptions) -> Result<String> {
        let body = CompletionRequest {
            model: &self.config.model,
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream: false,
        };

        let mut request = self.http.post(self.endpoint()).json(&body);
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        debug!(
            "Sending completion request to {} (model {}, {} chars)",
            self.config.base_url,
            self.config.model,
            prompt.len()
        );

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.map_send_error(e))?;

        if !status.is_success() {
            warn!("LLM backend returned {}: {}", status, text);
            return Err(LlmError::api(status.as_u16(), text));
        }

        let parsed: CompletionResponse = serde_json::from_str(&text)
            .map_err(|e| LlmError::parse_error(e.to_string(), text.clone()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        Ok(content)
    }

    async fn invoke(&self, prompt: &str) -> Result<ChatResponse> {
        let content = self.generate(prompt, GenerateOptions::default()).await?;
        Ok(ChatResponse::new(content))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "openai-compatible".to_string(),
            model: self.config.model.clone(),
        }
    }
}
