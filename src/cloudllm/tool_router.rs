//! Tool Router (§4.4): unifies local function tools and MCP-discovered
//! remote tools under one sanitized namespace and mediates invocation.
//!
//! Diverges deliberately from the teacher's `ToolRegistry`: an unknown tool
//! name never aborts the call, it becomes a `tool_execution_failed` result
//! and the loop continues.

use crate::cloudllm::mcp_source::McpToolSource;
use crate::cloudllm::model::UnifiedTool;
use async_trait::async_trait;
use log::warn;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A process-local function tool implementation.
#[async_trait]
pub trait FunctionTool: Send + Sync {
    fn metadata(&self) -> UnifiedTool;
    async fn execute(&self, arguments: &Value) -> Result<Value, String>;
}

enum Exec {
    Function(Arc<dyn FunctionTool>),
    Mcp { remote_name: String, source: Arc<dyn McpToolSource> },
}

struct Entry {
    metadata: UnifiedTool,
    exec: Exec,
}

/// Unified, per-call view over local function tools and MCP tools.
pub struct ToolRouter {
    tools: HashMap<String, Entry>,
}

impl ToolRouter {
    /// Registers function tools and discovers tools from every listed MCP
    /// server. Discovery failures are logged and swallowed (§4.4); the call
    /// proceeds with whatever tools were discoverable.
    pub async fn build(
        function_tools: Vec<Arc<dyn FunctionTool>>,
        mcp_servers: &[(String, Arc<dyn McpToolSource>)],
    ) -> Self {
        let mut tools = HashMap::new();
        for tool in function_tools {
            let metadata = tool.metadata();
            let name = metadata.name.clone();
            tools.insert(name, Entry { metadata, exec: Exec::Function(tool) });
        }

        for (server_name, source) in mcp_servers {
            match source.list_tools().await {
                Ok(descriptors) => {
                    for d in descriptors {
                        let canonical = format!("{}.{}", server_name, d.name);
                        let metadata = UnifiedTool {
                            name: canonical.clone(),
                            description: d.description.clone(),
                            parameters_json_schema: d.parameters_json_schema.clone(),
                        };
                        tools.insert(
                            canonical,
                            Entry { metadata, exec: Exec::Mcp { remote_name: d.name.clone(), source: source.clone() } },
                        );
                    }
                }
                Err(e) => {
                    warn!("MCP discovery failed for server '{}': {}", server_name, e);
                }
            }
        }

        Self { tools }
    }

    /// Canonical tool names currently routable, for building provider tool lists.
    pub fn canonical_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Full tool metadata (name/description/schema) for every routable tool,
    /// used to build the per-provider tool list.
    pub fn unified_tools(&self) -> Vec<UnifiedTool> {
        self.tools.values().map(|e| e.metadata.clone()).collect()
    }

    /// Invokes `canonical_name`. Unknown names never error the call; they
    /// return a `tool_execution_failed` result so the loop continues.
    pub async fn route_and_invoke(&self, canonical_name: &str, arguments: &Value) -> Value {
        match self.tools.get(canonical_name) {
            None => json!({ "error": "tool_execution_failed", "details": format!("unknown tool '{}'", canonical_name) }),
            Some(Entry { exec: Exec::Function(tool), .. }) => match tool.execute(arguments).await {
                Ok(result) => result,
                Err(details) => json!({ "error": "tool_execution_failed", "details": details }),
            },
            Some(Entry { exec: Exec::Mcp { remote_name, source }, .. }) => match source.call_tool(remote_name, arguments).await {
                Ok(result) => result,
                Err(e) => json!({ "error": "tool_execution_failed", "details": e.to_string() }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::mcp_source::{InMemoryMcpSource, McpToolDescriptor};

    struct Echo;

    #[async_trait]
    impl FunctionTool for Echo {
        fn metadata(&self) -> UnifiedTool {
            UnifiedTool { name: "echo".to_string(), description: "echoes".to_string(), parameters_json_schema: json!({}) }
        }

        async fn execute(&self, arguments: &Value) -> Result<Value, String> {
            Ok(arguments.clone())
        }
    }

    #[tokio::test]
    async fn routes_to_a_registered_function_tool() {
        let router = ToolRouter::build(vec![Arc::new(Echo)], &[]).await;
        let result = router.route_and_invoke("echo", &json!({ "x": 1 })).await;
        assert_eq!(result, json!({ "x": 1 }));
    }

    #[tokio::test]
    async fn unknown_tool_returns_non_fatal_error_result() {
        let router = ToolRouter::build(vec![], &[]).await;
        let result = router.route_and_invoke("nonexistent", &json!({})).await;
        assert_eq!(result["error"], "tool_execution_failed");
    }

    #[tokio::test]
    async fn mcp_tools_are_namespaced_by_server() {
        let mut results = HashMap::new();
        results.insert("search".to_string(), json!({ "hits": [] }));
        let source: Arc<dyn McpToolSource> = Arc::new(InMemoryMcpSource::new(
            vec![McpToolDescriptor { name: "search".into(), description: "searches".into(), parameters_json_schema: json!({}) }],
            results,
        ));
        let router = ToolRouter::build(vec![], &[("docs".to_string(), source)]).await;
        assert!(router.canonical_names().contains(&"docs.search".to_string()));
        let result = router.route_and_invoke("docs.search", &json!({})).await;
        assert_eq!(result, json!({ "hits": [] }));
    }

    #[tokio::test]
    async fn discovery_failure_is_swallowed_and_call_proceeds() {
        let source: Arc<dyn McpToolSource> = Arc::new(InMemoryMcpSource::failing_discovery());
        let router = ToolRouter::build(vec![Arc::new(Echo)], &[("flaky".to_string(), source)]).await;
        assert_eq!(router.canonical_names(), vec!["echo".to_string()]);
    }
}
