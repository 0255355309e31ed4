//! Tool-calling text injection for the `Compatible` policy (§4.8, §9):
//! backends without native tool-call support get the tool catalog
//! rendered into the system prompt and their response text scanned for
//! a `[TOOL_CALL: {...}]` marker.
//!
//! Grounded in the teacher's `prompt.rs` (`PromptBuilder::with_tools`,
//! `parse_tool_call`), stripped of the gold-loan persona/system-prompt
//! builder since system prompt assembly is now the caller's concern
//! (`voxrelay_core::ConversationHistory` already owns the system
//! message).

use voxrelay_core::ToolDefinition;

const START_MARKER: &str = "[TOOL_CALL:";
const END_MARKER: &str = "]";

/// Render the tool catalog as a system-prompt fragment instructing the
/// model to emit `[TOOL_CALL: {"name": ..., "arguments": {...}}]`.
pub fn render_tool_injection(tools: &[ToolDefinition]) -> String {
    if tools.is_empty() {
        return String::new();
    }

    let mut out = String::from(
        "You can call the following tools. To call one, respond with exactly \
         `[TOOL_CALL: {\"name\": \"tool_name\", \"arguments\": {...}}]` and nothing else \
         on that line.\n\nAvailable tools:\n",
    );
    for tool in tools {
        out.push_str(&format!(
            "- {}: {} (arguments schema: {})\n",
            tool.name, tool.description, tool.input_schema
        ));
    }
    out
}

#[derive(Debug, Clone)]
pub struct ParsedToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
    pub text_before: String,
    pub text_after: String,
}

/// Extract a `[TOOL_CALL: {...}]` marker from model output, if present.
pub fn parse_tool_call(response: &str) -> Option<ParsedToolCall> {
    let start_idx = response.find(START_MARKER)?;
    let json_start = start_idx + START_MARKER.len();

    let remaining = &response[json_start..];
    let end_idx = remaining.find(END_MARKER)?;
    let json_str = remaining[..end_idx].trim();

    let value: serde_json::Value = serde_json::from_str(json_str).ok()?;
    let name = value.get("name")?.as_str()?.to_string();
    let arguments = value
        .get("arguments")
        .cloned()
        .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

    Some(ParsedToolCall {
        name,
        arguments,
        text_before: response[..start_idx].trim().to_string(),
        text_after: response[json_start + end_idx + 1..].trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use voxrelay_core::ToolPhase;

    fn sample_tool() -> ToolDefinition {
        ToolDefinition {
            name: "check_eligibility".into(),
            description: "check eligibility".into(),
            input_schema: serde_json::json!({"type": "object"}),
            phase: ToolPhase::InCall,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn injection_is_empty_when_no_tools_are_offered() {
        assert_eq!(render_tool_injection(&[]), "");
    }

    #[test]
    fn injection_names_every_tool() {
        let rendered = render_tool_injection(&[sample_tool()]);
        assert!(rendered.contains("check_eligibility"));
    }

    #[test]
    fn parses_a_tool_call_with_surrounding_text() {
        let response = r#"Let me check that for you. [TOOL_CALL: {"name": "check_eligibility", "arguments": {"weight": 50}}] one moment"#;
        let parsed = parse_tool_call(response).unwrap();
        assert_eq!(parsed.name, "check_eligibility");
        assert_eq!(parsed.arguments["weight"], 50);
        assert_eq!(parsed.text_before, "Let me check that for you.");
        assert_eq!(parsed.text_after, "one moment");
    }

    #[test]
    fn returns_none_when_no_marker_is_present() {
        assert!(parse_tool_call("just a normal response").is_none());
    }
}
