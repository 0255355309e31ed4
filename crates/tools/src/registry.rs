//! Tool Registry & Executor (§4.8): argument validation, per-tool
//! timeout, and dispatch. Read-mostly and process-wide; swapped
//! atomically on config reload by wrapping a `ToolRegistry` in
//! `arc-swap`-style replacement at the call site (the registry itself
//! stays an immutable snapshot).
//!
//! Grounded in the teacher's `registry.rs`: `ToolRegistry` is a
//! `HashMap<String, Arc<dyn Tool>>`, `ToolExecutor::execute` wraps the
//! call in `tokio::time::timeout`, and `ToolCallTracker` is a bounded
//! `VecDeque` recording recent calls for diagnostics.

use crate::tool::Tool;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use jsonschema::JSONSchema;
use voxrelay_core::{Result, ToolDefinition, ToolInvocation, ToolOutput, ToolStatus};

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name.clone();
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition().clone()).collect()
    }
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, invocation: ToolInvocation) -> Result<ToolOutput>;
    fn list_tools(&self) -> Vec<ToolDefinition>;
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, invocation: ToolInvocation) -> Result<ToolOutput> {
        let Some(tool) = self.get(&invocation.name) else {
            return Ok(ToolOutput::error(format!("no such tool: {}", invocation.name)));
        };

        let definition = tool.definition().clone();
        if let Err(detail) = validate_arguments(&definition, &invocation.arguments) {
            return Ok(ToolOutput::error(detail));
        }

        match tokio::time::timeout(definition.timeout, tool.execute(&invocation)).await {
            Ok(result) => result,
            Err(_) => Ok(ToolOutput::error(format!(
                "tool '{}' timed out after {:?}",
                definition.name, definition.timeout
            ))),
        }
    }

    fn list_tools(&self) -> Vec<ToolDefinition> {
        self.definitions()
    }
}

fn validate_arguments(definition: &ToolDefinition, arguments: &serde_json::Value) -> std::result::Result<(), String> {
    let schema = JSONSchema::compile(&definition.input_schema)
        .map_err(|e| format!("invalid schema for tool '{}': {e}", definition.name))?;

    match schema.validate(arguments) {
        Ok(()) => Ok(()),
        Err(errors) => {
            let joined = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
            Err(format!(
                "tool '{}' argument validation failed: {joined}",
                definition.name
            ))
        }
    }
}

/// One completed tool invocation, kept for diagnostics and for building
/// `pre_call_results.*` context available to later HTTP tool calls.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
    pub output: ToolOutput,
    pub duration_ms: u64,
    pub recorded_at: Instant,
}

impl ToolCall {
    pub fn succeeded(&self) -> bool {
        matches!(self.output.status, ToolStatus::Ok)
    }
}

/// Bounded recent-call history, one per session. Oldest entries are
/// dropped once `max_history` is reached.
pub struct ToolCallTracker {
    calls: VecDeque<ToolCall>,
    max_history: usize,
}

impl ToolCallTracker {
    pub fn new(max_history: usize) -> Self {
        Self {
            calls: VecDeque::with_capacity(max_history.min(256)),
            max_history,
        }
    }

    pub fn record(&mut self, call: ToolCall) {
        if self.calls.len() >= self.max_history {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
    }

    pub fn recent(&mut self, n: usize) -> &[ToolCall] {
        let contiguous = self.calls.make_contiguous();
        let start = contiguous.len().saturating_sub(n);
        &contiguous[start..]
    }

    pub fn all(&mut self) -> &[ToolCall] {
        self.calls.make_contiguous()
    }

    pub fn by_name(&self, name: &str) -> Vec<&ToolCall> {
        self.calls.iter().filter(|c| c.name == name).collect()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::Tool;
    use std::time::Duration;
    use voxrelay_core::ToolPhase;

    struct EchoTool(ToolDefinition);

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> &ToolDefinition {
            &self.0
        }
        async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
            Ok(ToolOutput::ok_with_data(
                "echoed",
                invocation.arguments.clone(),
            ))
        }
    }

    struct StallingTool(ToolDefinition);

    #[async_trait]
    impl Tool for StallingTool {
        fn definition(&self) -> &ToolDefinition {
            &self.0
        }
        async fn execute(&self, _invocation: &ToolInvocation) -> Result<ToolOutput> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ToolOutput::ok("never gets here"))
        }
    }

    fn echo_definition() -> ToolDefinition {
        ToolDefinition {
            name: "echo".into(),
            description: "echoes its arguments".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
            phase: ToolPhase::InCall,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn registers_and_executes_a_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool(echo_definition())));
        assert!(registry.has("echo"));

        let output = registry
            .execute(ToolInvocation {
                id: "1".into(),
                name: "echo".into(),
                arguments: serde_json::json!({ "text": "hi" }),
            })
            .await
            .unwrap();
        assert!(output.is_ok());
    }

    #[tokio::test]
    async fn rejects_arguments_that_fail_schema_validation() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool(echo_definition())));

        let result = registry
            .execute(ToolInvocation {
                id: "1".into(),
                name: "echo".into(),
                arguments: serde_json::json!({}),
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let registry = ToolRegistry::new();
        let result = registry
            .execute(ToolInvocation {
                id: "1".into(),
                name: "nonexistent".into(),
                arguments: serde_json::json!({}),
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn a_tool_that_outlives_its_timeout_yields_an_error_output_not_a_hang() {
        let mut registry = ToolRegistry::new();
        let mut definition = echo_definition();
        definition.name = "stall".into();
        definition.input_schema = serde_json::json!({ "type": "object" });
        definition.timeout = Duration::from_millis(10);
        registry.register(Arc::new(StallingTool(definition)));

        let output = registry
            .execute(ToolInvocation {
                id: "1".into(),
                name: "stall".into(),
                arguments: serde_json::json!({}),
            })
            .await
            .unwrap();
        assert!(!output.is_ok());
    }

    #[test]
    fn tracker_evicts_oldest_past_capacity() {
        let mut tracker = ToolCallTracker::new(2);
        for i in 0..3 {
            tracker.record(ToolCall {
                name: format!("tool-{i}"),
                arguments: serde_json::json!({}),
                output: ToolOutput::ok("done"),
                duration_ms: 1,
                recorded_at: Instant::now(),
            });
        }
        assert_eq!(tracker.all().len(), 2);
        assert_eq!(tracker.all()[0].name, "tool-1");
        assert_eq!(tracker.all()[1].name, "tool-2");
    }
}
