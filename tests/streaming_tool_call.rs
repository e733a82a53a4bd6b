//! End-to-end: an Anthropic-shaped chunk sequence for a single tool call
//! drives the expected START/DELTA/DELTA/END event order and triggers a
//! tool-execution cycle before the turn finishes.

use async_trait::async_trait;
use llm_coordinator::cloudllm::config::CoordinatorConfig;
use llm_coordinator::cloudllm::coordinator::{Coordinator, CredentialAccessor};
use llm_coordinator::cloudllm::error::CoordinatorError;
use llm_coordinator::cloudllm::model::{Event, LLMCallSpec, Message, ProviderTarget, ToolEvent, UnifiedTool};
use llm_coordinator::cloudllm::stream_coordinator::{ChunkStream, ProviderStreamOpener, run_stream};
use llm_coordinator::cloudllm::tool_router::{FunctionTool, ToolRouter};
use serde_json::{json, Value};
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;

struct FixedCredentials;
impl CredentialAccessor for FixedCredentials {
    fn api_key(&self, _provider: &str) -> Option<String> {
        Some("sk-test".to_string())
    }
    fn base_url(&self, _provider: &str) -> String {
        "https://example.invalid".to_string()
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

struct ScriptedChunkStream {
    chunks: VecDeque<Value>,
}

#[async_trait]
impl ChunkStream for ScriptedChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Value>, CoordinatorError> {
        Ok(self.chunks.pop_front())
    }
}

/// First open serves the scripted tool-call chunk sequence; every later open
/// (the resumed turn after the tool result is injected) serves a plain
/// text-completion finish so the stream terminates.
struct ScriptedOpener;

#[async_trait]
impl ProviderStreamOpener for ScriptedOpener {
    async fn open_stream(&self, _provider: &str, _model: &str, payload: &Value) -> Result<Box<dyn ChunkStream>, CoordinatorError> {
        let saw_tool_result = payload.to_string().contains("tool_result");

        let chunks: Vec<Value> = if saw_tool_result {
            vec![json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": "done" } }), json!({ "type": "message_delta", "delta": { "stop_reason": "end_turn" } })]
        } else {
            vec![
                json!({ "type": "content_block_start", "index": 0, "content_block": { "type": "tool_use", "id": "call-1", "name": "echo" } }),
                json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "input_json_delta", "partial_json": "{\"text\":" } }),
                json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "input_json_delta", "partial_json": "\"hi\"}" } }),
                json!({ "type": "content_block_stop", "index": 0 }),
                json!({ "type": "message_delta", "delta": { "stop_reason": "tool_use" } }),
            ]
        };

        Ok(Box::new(ScriptedChunkStream { chunks: chunks.into() }))
    }
}

#[tokio::test]
async fn tool_call_chunk_sequence_emits_start_delta_delta_end_then_executes() {
    let coordinator = Arc::new(Coordinator::new(CoordinatorConfig::default(), Box::new(FixedCredentials)));
    let router = Arc::new(ToolRouter::build(vec![Arc::new(Echo)], &[]).await);
    let opener = Arc::new(ScriptedOpener);

    let spec = LLMCallSpec {
        messages: vec![Message::user("use the echo tool")],
        llm_priority: vec![ProviderTarget { provider: "anthropic".to_string(), model: "claude-3-5-sonnet".to_string() }],
        ..Default::default()
    };

    let events: Vec<_> = run_stream(coordinator, spec, router, opener).collect().await;
    let events: Vec<_> = events.into_iter().map(|e| e.unwrap()).collect();

    let tool_events: Vec<&ToolEvent> = events
        .iter()
        .filter_map(|e| match e {
            Event::Tool { tool_event } => Some(tool_event),
            _ => None,
        })
        .collect();

    assert!(matches!(tool_events[0], ToolEvent::ToolCallStart { .. }));
    assert!(matches!(tool_events[1], ToolEvent::ToolCallArgumentsDelta { .. }));
    assert!(matches!(tool_events[2], ToolEvent::ToolCallArgumentsDelta { .. }));
    match tool_events[3] {
        ToolEvent::ToolCallEnd { arguments, .. } => assert_eq!(arguments, "{\"text\":\"hi\"}"),
        other => panic!("expected END, got {:?}", other),
    }
    match tool_events[4] {
        ToolEvent::ToolResult { result, .. } => assert_eq!(result, &json!({"text": "hi"})),
        other => panic!("expected ToolResult, got {:?}", other),
    }

    assert!(events.iter().any(|e| matches!(e, Event::ToolCall { .. })));
    assert!(matches!(events.last().unwrap(), Event::Done { .. }));
    if let Event::Done { response } = events.last().unwrap() {
        assert_eq!(response.content[0].as_text(), Some("done"));
        assert!(response.raw.tool_results.iter().any(|r| r.result == json!({"text": "hi"})));
    }
}
