//! The `Tool` trait every built-in and HTTP-backed tool implements.
//!
//! Grounded in the teacher's `registry.rs` executor idiom (tools are
//! trait objects behind `Arc<dyn Tool>`, argument validation happens in
//! the registry, not per-tool), generalized over `voxrelay_core`'s
//! telephony-neutral `ToolDefinition`/`ToolInvocation`/`ToolOutput` types
//! rather than the teacher's MCP-shaped ones.

use async_trait::async_trait;
use voxrelay_core::{Result, ToolDefinition, ToolInvocation, ToolOutput};

#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> &ToolDefinition;

    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutput>;
}
