//! End-to-end: an invalid primary target falls through to the next
//! `(provider, model)` entry and the call still succeeds.

use async_trait::async_trait;
use llm_coordinator::cloudllm::config::CoordinatorConfig;
use llm_coordinator::cloudllm::coordinator::{Coordinator, CredentialAccessor};
use llm_coordinator::cloudllm::error::CoordinatorError;
use llm_coordinator::cloudllm::invoker::{HttpInvoker, RawAttempt};
use llm_coordinator::cloudllm::model::{LLMCallSpec, Message, ProviderTarget};
use llm_coordinator::cloudllm::tool_router::ToolRouter;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct FixedCredentials;
impl CredentialAccessor for FixedCredentials {
    fn api_key(&self, _provider: &str) -> Option<String> {
        Some("sk-test-key-1234".to_string())
    }
    fn base_url(&self, _provider: &str) -> String {
        "https://example.invalid/v1/chat/completions".to_string()
    }
}

/// First attempt reports a 5xx (standing in for the nonexistent-model
/// target failing); every subsequent attempt succeeds. `calls` is shared
/// with the test so it can assert the attempt count after `run` returns.
struct FlakyFirstAttempt {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl HttpInvoker for FlakyFirstAttempt {
    async fn send(&self, _url: &str, _headers: &[(String, String)], _payload: &Value) -> Result<RawAttempt, CoordinatorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            return Ok(RawAttempt { status: 503, body: json!({ "error": "model not found" }), retry_words_matched: false });
        }
        Ok(RawAttempt {
            status: 200,
            body: json!({ "choices": [{ "message": { "content": "INTEGRATION_TEST_OK" }, "finish_reason": "stop" }] }),
            retry_words_matched: false,
        })
    }
}

#[tokio::test]
async fn falls_through_to_second_target_and_succeeds() {
    let calls = Arc::new(AtomicUsize::new(0));
    let coordinator = Coordinator::with_invoker(
        CoordinatorConfig::default(),
        Box::new(FixedCredentials),
        Box::new(FlakyFirstAttempt { calls: calls.clone() }),
    );

    let router = ToolRouter::build(vec![], &[]).await;
    let spec = LLMCallSpec {
        messages: vec![Message::system("reply exactly with: INTEGRATION_TEST_OK")],
        llm_priority: vec![
            ProviderTarget { provider: "openai".to_string(), model: "nonexistent-model".to_string() },
            ProviderTarget { provider: "openai".to_string(), model: "good-model".to_string() },
        ],
        ..Default::default()
    };

    let response = coordinator.run(&spec, &router).await.unwrap();

    assert_eq!(response.provider, "openai");
    assert_eq!(response.model, "good-model");
    assert_eq!(response.content[0].as_text(), Some("INTEGRATION_TEST_OK"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
