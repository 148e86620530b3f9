//! Behaviour of the scripted client through the `LlmClient` trait object

use std::sync::Arc;
use std::time::Duration;

use companion_llm::{GenerateOptions, LlmClient, LlmError, ScriptedLlmClient};

#[test]
fn test_trait_object_generate() {
    let client: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::always("42"));
    let text = tokio_test::block_on(client.generate("score?", GenerateOptions::new(0.1, 10)))
        .unwrap();
    assert_eq!(text, "42");
    assert_eq!(client.model_info().provider, "scripted");
}

#[test]
fn test_options_are_recorded() {
    let client = ScriptedLlmClient::always("ok");
    tokio_test::block_on(async {
        client
            .generate("p", GenerateOptions::new(0.1, 10))
            .await
            .unwrap();
        let calls = client.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].options.max_tokens, 10);
    });
}

#[test]
fn test_failing_client_is_recoverable() {
    let client = ScriptedLlmClient::failing("backend down");
    let err = tokio_test::block_on(client.invoke("x")).unwrap_err();
    assert!(matches!(err, LlmError::Backend(_)));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_latency_is_applied() {
    let client = ScriptedLlmClient::always("slow").with_latency(Duration::from_millis(20));
    let started = std::time::Instant::now();
    client.invoke("x").await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(20));
}
