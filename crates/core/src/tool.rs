//! Tool definitions, invocation records, and results (§4.8 "Tool Registry & Executor").

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When a tool is eligible to run relative to the turn it was requested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPhase {
    /// Runs before the LLM response's assistant audio begins playing.
    PreCall,
    /// Runs once the turn's assistant audio has fully drained (§9 decision 1).
    InCall,
    /// Runs after the call has ended; never blocks call teardown.
    PostCall,
}

/// Schema and dispatch metadata for a single tool, as registered with the
/// tool registry. `input_schema` is a JSON Schema document validated
/// against arguments before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub phase: ToolPhase,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// A single LLM-emitted request to run a named tool with arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Ok,
    Error,
}

/// What a tool execution produced, fed back to the LLM as a tool-result
/// message and recorded in the call's persisted tool-call history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub status: ToolStatus,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Ok,
            message: message.into(),
            data: None,
        }
    }

    pub fn ok_with_data(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            status: ToolStatus::Ok,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            message: message.into(),
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, ToolStatus::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_round_trips_through_json_as_seconds() {
        let def = ToolDefinition {
            name: "hangup".into(),
            description: "end the call".into(),
            input_schema: serde_json::json!({"type": "object"}),
            phase: ToolPhase::InCall,
            timeout: Duration::from_secs(5),
        };
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["timeout"], 5);
        let back: ToolDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back.timeout, Duration::from_secs(5));
    }
}
