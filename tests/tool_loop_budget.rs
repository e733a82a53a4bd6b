//! End-to-end: a two-iteration tool loop against a local `echo` function
//! tool, with the budget exhausting exactly on the final cycle.

use async_trait::async_trait;
use llm_coordinator::cloudllm::config::CoordinatorConfig;
use llm_coordinator::cloudllm::coordinator::{Coordinator, CredentialAccessor};
use llm_coordinator::cloudllm::error::CoordinatorError;
use llm_coordinator::cloudllm::invoker::{HttpInvoker, RawAttempt};
use llm_coordinator::cloudllm::model::{LLMCallSpec, Message, ProviderTarget, Settings, UnifiedTool};
use llm_coordinator::cloudllm::tool_budget::FINAL_PROMPT_TEXT;
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

/// Two scripted tool-call turns followed by a final answer; records every
/// outgoing payload so the test can inspect the final request.
struct ScriptedTwoToolTurns {
    calls: AtomicUsize,
    sent: Mutex<Vec<Value>>,
}

#[async_trait]
impl HttpInvoker for ScriptedTwoToolTurns {
    async fn send(&self, _url: &str, _headers: &[(String, String)], payload: &Value) -> Result<RawAttempt, CoordinatorError> {
        self.sent.lock().unwrap().push(payload.clone());
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let body = match n {
            0 => json!({ "choices": [{
                "message": { "content": null, "tool_calls": [
                    { "id": "call_0", "type": "function", "function": { "name": "echo", "arguments": "{\"msg\":\"first\"}" } }
                ]},
                "finish_reason": "tool_calls"
            }]}),
            1 => json!({ "choices": [{
                "message": { "content": null, "tool_calls": [
                    { "id": "call_1", "type": "function", "function": { "name": "echo", "arguments": "{\"msg\":\"second\"}" } }
                ]},
                "finish_reason": "tool_calls"
            }]}),
            _ => json!({ "choices": [{
                "message": { "content": "echoed first and echoed second" },
                "finish_reason": "stop"
            }]}),
        };
        Ok(RawAttempt { status: 200, body, retry_words_matched: false })
    }
}

/// Forwards to a shared `ScriptedTwoToolTurns` so the test can inspect
/// captured requests after `Coordinator` has taken ownership of its invoker.
struct Forwarding(Arc<ScriptedTwoToolTurns>);

#[async_trait]
impl HttpInvoker for Forwarding {
    async fn send(&self, url: &str, headers: &[(String, String)], payload: &Value) -> Result<RawAttempt, CoordinatorError> {
        self.0.send(url, headers, payload).await
    }
}

#[tokio::test]
async fn budget_exhausts_on_second_cycle_and_injects_final_prompt() {
    let _ = env_logger::try_init();
    let invoker = Arc::new(ScriptedTwoToolTurns { calls: AtomicUsize::new(0), sent: Mutex::new(Vec::new()) });
    let coordinator = Coordinator::with_invoker(
        CoordinatorConfig::default(),
        Box::new(FixedCredentials),
        Box::new(Forwarding(invoker.clone())),
    );

    let router = ToolRouter::build(vec![Arc::new(Echo)], &[]).await;
    let spec = LLMCallSpec {
        messages: vec![Message::user("use the echo tool twice")],
        llm_priority: vec![ProviderTarget { provider: "openai".to_string(), model: "gpt-4o".to_string() }],
        settings: Settings {
            max_tool_iterations: Some(2),
            tool_countdown_enabled: true,
            tool_final_prompt_enabled: true,
            ..Default::default()
        },
        ..Default::default()
    };

    let response = coordinator.run(&spec, &router).await.unwrap();

    assert_eq!(response.content[0].as_text(), Some("echoed first and echoed second"));
    assert!(response.raw.tool_results.iter().any(|r| r.result == json!({"msg": "first"})));
    assert!(response.raw.tool_results.iter().any(|r| r.result == json!({"msg": "second"})));

    let sent = invoker.sent.lock().unwrap();
    assert_eq!(sent.len(), 3);
    let final_request = sent.last().unwrap().to_string();
    assert!(final_request.contains(FINAL_PROMPT_TEXT));
    assert_eq!(sent.last().unwrap().get("tools"), None);
    assert!(final_request.contains("first"));
    assert!(final_request.contains("second"));
}
