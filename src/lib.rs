// src/lib.rs

// Import the top-level `cloudllm` module.
pub mod cloudllm;

// Re-exporting key items for easier external access, so callers don't have
// to navigate the full module path for everyday use.
pub use cloudllm::config::CoordinatorConfig;
pub use cloudllm::coordinator::{Coordinator, CredentialAccessor};
pub use cloudllm::error::CoordinatorError;
pub use cloudllm::mcp_source::{InMemoryMcpSource, McpToolDescriptor, McpToolSource};
pub use cloudllm::model::{
    ContentPart, Event, LLMCallSpec, LLMResponse, Message, ProviderTarget, Reasoning, Role, Settings, ToolCall,
    ToolChoice, ToolEvent, UnifiedTool,
};
pub use cloudllm::stream_coordinator::{run_stream, ChunkStream, EventStream, ProviderStreamOpener};
pub use cloudllm::tool_router::{FunctionTool, ToolRouter};
pub use cloudllm::vector_context::{InMemoryVectorStore, VectorContextSpec, VectorHit, VectorStore};
