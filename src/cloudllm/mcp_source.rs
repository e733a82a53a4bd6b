//! Client-side MCP contract. The concrete transport (framing, handshake) is
//! an external collaborator; this module only defines the narrow trait the
//! Tool Router depends on, plus an in-memory test double.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug)]
pub struct McpDiscoveryError(pub String);

impl fmt::Display for McpDiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MCP discovery error: {}", self.0)
    }
}

impl std::error::Error for McpDiscoveryError {}

/// One tool as advertised by an MCP server.
#[derive(Debug, Clone)]
pub struct McpToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters_json_schema: Value,
}

/// A transport crate implements this against one MCP server connection.
#[async_trait]
pub trait McpToolSource: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<McpToolDescriptor>, McpDiscoveryError>;
    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<Value, McpDiscoveryError>;
}

/// In-memory test double: a fixed tool catalog and canned call results,
/// keyed by tool name.
pub struct InMemoryMcpSource {
    tools: Vec<McpToolDescriptor>,
    results: HashMap<String, Value>,
    fail_discovery: bool,
}

impl InMemoryMcpSource {
    pub fn new(tools: Vec<McpToolDescriptor>, results: HashMap<String, Value>) -> Self {
        Self { tools, results, fail_discovery: false }
    }

    pub fn failing_discovery() -> Self {
        Self { tools: Vec::new(), results: HashMap::new(), fail_discovery: true }
    }
}

#[async_trait]
impl McpToolSource for InMemoryMcpSource {
    async fn list_tools(&self) -> Result<Vec<McpToolDescriptor>, McpDiscoveryError> {
        if self.fail_discovery {
            return Err(McpDiscoveryError("simulated discovery failure".to_string()));
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, _arguments: &Value) -> Result<Value, McpDiscoveryError> {
        self.results
            .get(name)
            .cloned()
            .ok_or_else(|| McpDiscoveryError(format!("no canned result for tool '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn lists_configured_tools() {
        let source = InMemoryMcpSource::new(
            vec![McpToolDescriptor { name: "echo".into(), description: "echoes".into(), parameters_json_schema: json!({}) }],
            HashMap::new(),
        );
        let tools = source.list_tools().await.unwrap();
        assert_eq!(tools[0].name, "echo");
    }

    #[tokio::test]
    async fn discovery_failure_is_a_typed_error() {
        let source = InMemoryMcpSource::failing_discovery();
        assert!(source.list_tools().await.is_err());
    }

    #[tokio::test]
    async fn call_tool_returns_canned_result() {
        let mut results = HashMap::new();
        results.insert("echo".to_string(), json!({ "ok": true }));
        let source = InMemoryMcpSource::new(vec![], results);
        let result = source.call_tool("echo", &json!({})).await.unwrap();
        assert_eq!(result, json!({ "ok": true }));
    }
}
