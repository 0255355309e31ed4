//! Conversation history and turn types (§3 "Turn", "Conversation History").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call surfaced on an assistant message, kept with the message so
/// the paired tool result can be reinserted at the right place on replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRef {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRef>,
    /// Set on `Role::Tool` messages: which invocation this result answers.
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Ordered list of role-tagged messages, bounded by a context window policy.
///
/// The first message is treated as the system prompt and is never elided;
/// overflow drops the oldest non-system messages first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationHistory {
    messages: Vec<Message>,
    max_messages: usize,
}

impl ConversationHistory {
    pub fn new(system_prompt: impl Into<String>, max_messages: usize) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
            max_messages: max_messages.max(1),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.enforce_window();
    }

    fn enforce_window(&mut self) {
        if self.messages.len() <= self.max_messages {
            return;
        }
        let overflow = self.messages.len() - self.max_messages;
        // Keep index 0 (system message) untouched; drop the oldest
        // non-system entries immediately after it.
        self.messages.drain(1..1 + overflow.min(self.messages.len().saturating_sub(1)));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// One logical exchange: ingress segment → transcripts → LLM response →
/// zero or more TTS playbacks. Turns are strictly ordered per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TurnIndex(pub u64);

impl TurnIndex {
    pub fn first() -> Self {
        TurnIndex(0)
    }

    pub fn next(self) -> Self {
        TurnIndex(self.0 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_message_survives_overflow() {
        let mut history = ConversationHistory::new("you are a voice agent", 3);
        for i in 0..10 {
            history.push(Message::user(format!("turn {i}")));
        }
        assert_eq!(history.messages().len(), 3);
        assert_eq!(history.messages()[0].role, Role::System);
        assert_eq!(history.messages()[0].content, "you are a voice agent");
    }

    #[test]
    fn turn_index_is_monotonic() {
        let first = TurnIndex::first();
        let second = first.next();
        assert!(second > first);
    }
}
