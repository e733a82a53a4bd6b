//! End-to-end: with `preserveToolResults="none"`, the tool result from two
//! cycles back is redacted in the payload sent for the third request while
//! the immediately prior one stays verbatim.

use async_trait::async_trait;
use llm_coordinator::cloudllm::config::CoordinatorConfig;
use llm_coordinator::cloudllm::coordinator::{Coordinator, CredentialAccessor};
use llm_coordinator::cloudllm::error::CoordinatorError;
use llm_coordinator::cloudllm::invoker::{HttpInvoker, RawAttempt};
use llm_coordinator::cloudllm::model::{LLMCallSpec, Message, PreserveKeyword, PreservePolicy, ProviderTarget, Settings, UnifiedTool};
use llm_coordinator::cloudllm::redactor::REDACTION_PLACEHOLDER;
use llm_coordinator::cloudllm::tool_router::{FunctionTool, ToolRouter};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct FixedCredentials;
impl CredentialAccessor for FixedCredentials {
    fn api_key(&self, _provider: &str) -> Option<String> {
        Some("sk-test".to_string())
    }
    fn base_url(&self, _provider: &str) -> String {
        "https://example.invalid/v1/chat/completions".to_string()
    }
}

struct Echo;

#[async_trait]
impl FunctionTool for Echo {
    fn metadata(&self) -> UnifiedTool {
        UnifiedTool { name: "echo".to_string(), description: "echoes its input".to_string(), parameters_json_schema: json!({}) }
    }

    async fn execute(&self, arguments: &Value) -> Result<Value, String> {
        Ok(arguments.clone())
    }
}

struct ScriptedThreeTurns {
    calls: AtomicUsize,
    sent: Mutex<Vec<Value>>,
}

#[async_trait]
impl HttpInvoker for ScriptedThreeTurns {
    async fn send(&self, _url: &str, _headers: &[(String, String)], payload: &Value) -> Result<RawAttempt, CoordinatorError> {
        self.sent.lock().unwrap().push(payload.clone());
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let body = match n {
            0 => json!({ "choices": [{
                "message": { "content": null, "tool_calls": [
                    { "id": "call_0", "type": "function", "function": { "name": "echo", "arguments": "{\"msg\":\"first result\"}" } }
                ]},
                "finish_reason": "tool_calls"
            }]}),
            1 => json!({ "choices": [{
                "message": { "content": null, "tool_calls": [
                    { "id": "call_1", "type": "function", "function": { "name": "echo", "arguments": "{\"msg\":\"second result\"}" } }
                ]},
                "finish_reason": "tool_calls"
            }]}),
            _ => json!({ "choices": [{
                "message": { "content": "done" },
                "finish_reason": "stop"
            }]}),
        };
        Ok(RawAttempt { status: 200, body, retry_words_matched: false })
    }
}

struct Forwarding(Arc<ScriptedThreeTurns>);

#[async_trait]
impl HttpInvoker for Forwarding {
    async fn send(&self, url: &str, headers: &[(String, String)], payload: &Value) -> Result<RawAttempt, CoordinatorError> {
        self.0.send(url, headers, payload).await
    }
}

#[tokio::test]
async fn prior_cycle_tool_result_is_redacted_but_latest_stays_verbatim() {
    let invoker = Arc::new(ScriptedThreeTurns { calls: AtomicUsize::new(0), sent: Mutex::new(Vec::new()) });
    let coordinator = Coordinator::with_invoker(
        CoordinatorConfig::default(),
        Box::new(FixedCredentials),
        Box::new(Forwarding(invoker.clone())),
    );

    let router = ToolRouter::build(vec![Arc::new(Echo)], &[]).await;
    let spec = LLMCallSpec {
        messages: vec![Message::user("use the echo tool twice")],
        llm_priority: vec![ProviderTarget { provider: "openai".to_string(), model: "gpt-4o".to_string() }],
        settings: Settings { preserve_tool_results: PreservePolicy::Keyword(PreserveKeyword::None), ..Default::default() },
        ..Default::default()
    };

    let response = coordinator.run(&spec, &router).await.unwrap();
    assert_eq!(response.content[0].as_text(), Some("done"));

    let sent = invoker.sent.lock().unwrap();
    assert_eq!(sent.len(), 3);

    let final_request = sent.last().unwrap().to_string();
    assert_eq!(final_request.matches(REDACTION_PLACEHOLDER).count(), 1);
    assert!(!final_request.contains("first result"));
    assert!(final_request.contains("second result"));
}
