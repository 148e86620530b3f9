//! Scripted in-memory client for tests and offline runs
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::client::{GenerateOptions, LlmClient, ModelInfo};
use crate::errors::{LlmError, Result};

type Responder = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// A call observed by [`ScriptedLlmClient`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Prompt text
    pub prompt: String,
    /// Options the caller passed
    pub options: GenerateOptions,
}

/// An [`LlmClient`] that replays queued responses
///
/// Queued responses are consumed first; once the queue is empty the
/// responder closure (if any) answers, otherwise the call fails.
#[derive(Clone)]
pub struct ScriptedLlmClient {
    queue: Arc<Mutex<VecDeque<Result<String>>>>,
    responder: Option<Responder>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    latency: Option<Duration>,
}

impl Default for ScriptedLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLlmClient {
    /// Create a client with an empty script
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            responder: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            latency: None,
        }
    }

    /// Create a client that answers every call through `responder`
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Arc::new(responder)),
            ..Self::new()
        }
    }

    /// Create a client that always answers with the same text
    pub fn always(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::with_responder(move |_| Ok(text.clone()))
    }

    /// Create a client whose every call fails
    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::with_responder(move |_| Err(LlmError::backend(message.clone())))
    }

    /// Delay every answer by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue a successful completion
    pub async fn push_response(&self, text: impl Into<String>) {
        self.queue.lock().await.push_back(Ok(text.into()));
    }

    /// Queue a failure
    pub async fn push_error(&self, error: LlmError) {
        self.queue.lock().await.push_back(Err(error));
    }

    /// All calls received so far, in order
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    /// Number of calls received so far
    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn generate(&self, prompt: &str, options: GenerateOptions) -> Result<String> {
        self.calls.lock().await.push(RecordedCall {
            prompt: prompt.to_string(),
            options,
        });

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(next) = self.queue.lock().await.pop_front() {
            return next;
        }

        match self.responder {
            Some(ref responder) => responder(prompt),
            None => Err(LlmError::backend("script exhausted")),
        }
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "scripted".to_string(),
            model: "scripted".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_then_responder() {
        let client = ScriptedLlmClient::always("fallback");
        client.push_response("first").await;
        client.push_error(LlmError::timeout(1)).await;

        let opts = GenerateOptions::default();
        assert_eq!(client.generate("a", opts).await.unwrap(), "first");
        assert!(client.generate("b", opts).await.is_err());
        assert_eq!(client.generate("c", opts).await.unwrap(), "fallback");
        assert_eq!(client.call_count().await, 3);
    }

    #[tokio::test]
    async fn test_exhausted_script_fails() {
        let client = ScriptedLlmClient::new();
        let err = client
            .generate("anything", GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("script exhausted"));
    }

    #[tokio::test]
    async fn test_invoke_records_prompt() {
        let client = ScriptedLlmClient::with_responder(|p| Ok(p.to_uppercase()));
        let response = client.invoke("hello").await.unwrap();
        assert_eq!(response.content, "HELLO");

        let calls = client.calls().await;
        assert_eq!(calls[0].prompt, "hello");
    }
}
