//! Bounded conversation memory.
//!
//! A system message plus an ordered message list, pruned after every append
//! so `messages ≤ max_messages` and estimated tokens ≤ `max_tokens`.
//! Tokens are estimated as characters ÷ 4 plus a small per-message
//! constant — close enough for budget enforcement without a tokenizer.
//! Written only from the orchestrator thread; the summarizer reads
//! snapshots.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::tools::ToolCall;

/// Per-message token overhead in the estimate.
const PER_MESSAGE_TOKENS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ConversationMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// Assistant message describing requested tool calls.
    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_call_id: None,
            tool_calls: Some(calls),
        }
    }

    /// Tool-role result for one call.
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
            tool_calls: None,
        }
    }

    fn estimated_tokens(&self) -> usize {
        self.content.chars().count() / 4 + PER_MESSAGE_TOKENS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMemory {
    system: ConversationMessage,
    messages: Vec<ConversationMessage>,
    max_messages: usize,
    max_tokens: usize,
}

impl ConversationMemory {
    pub fn new(system_prompt: impl Into<String>, max_messages: usize, max_tokens: usize) -> Self {
        Self {
            system: ConversationMessage::system(system_prompt),
            messages: Vec::new(),
            max_messages,
            max_tokens,
        }
    }

    /// Append and prune. The system message is never pruned.
    pub fn push(&mut self, message: ConversationMessage) {
        debug_assert!(message.role != Role::System, "system message is fixed at index 0");
        self.messages.push(message);
        self.prune();
    }

    fn prune(&mut self) {
        let mut removed = 0usize;
        while self.len() > self.max_messages && !self.messages.is_empty() {
            self.messages.remove(0);
            removed += 1;
        }
        while self.estimated_tokens() > self.max_tokens && !self.messages.is_empty() {
            self.messages.remove(0);
            removed += 1;
        }
        if removed > 0 {
            debug!(removed, remaining = self.len(), "pruned conversation memory");
        }
    }

    /// Total messages including the system message.
    pub fn len(&self) -> usize {
        self.messages.len() + 1
    }

    pub fn estimated_tokens(&self) -> usize {
        self.system.estimated_tokens()
            + self
                .messages
                .iter()
                .map(ConversationMessage::estimated_tokens)
                .sum::<usize>()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system.content
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system.content = prompt.into();
    }

    /// Serialized view: system message first, then history in order.
    pub fn view(&self) -> Vec<ConversationMessage> {
        let mut out = Vec::with_capacity(self.len());
        out.push(self.system.clone());
        out.extend(self.messages.iter().cloned());
        out
    }

    /// The last `turns` user/assistant exchanges (2 messages per turn),
    /// for bounded-context prompt assembly. Tool traffic is omitted.
    pub fn recent_turns(&self, turns: usize) -> Vec<ConversationMessage> {
        let dialogue: Vec<&ConversationMessage> = self
            .messages
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant) && m.tool_calls.is_none())
            .collect();
        let keep = turns.saturating_mul(2).min(dialogue.len());
        dialogue[dialogue.len() - keep..]
            .iter()
            .map(|m| (*m).clone())
            .collect()
    }

    /// Everything after the system message, for summarizer snapshots.
    pub fn history(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// Drop the history, keeping the system message and limits. Used by the
    /// stateless translator persona.
    pub fn clear_history(&mut self) {
        self.messages.clear();
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> ConversationMemory {
        ConversationMemory::new("You are a radio operator.", 6, 10_000)
    }

    #[test]
    fn system_message_is_always_first() {
        let mut m = memory();
        m.push(ConversationMessage::user("hello"));
        let view = m.view();
        assert_eq!(view[0].role, Role::System);
        assert_eq!(view[1].content, "hello");
    }

    #[test]
    fn message_count_bound_holds_after_every_append() {
        let mut m = memory();
        for i in 0..20 {
            m.push(ConversationMessage::user(format!("message {i}")));
            assert!(m.len() <= 6, "len {} exceeded bound", m.len());
        }
        // The oldest non-system messages were removed.
        let view = m.view();
        assert_eq!(view[0].role, Role::System);
        assert_eq!(view[1].content, "message 15");
        assert_eq!(view.last().unwrap().content, "message 19");
    }

    #[test]
    fn token_bound_prunes_oldest_first() {
        let mut m = ConversationMemory::new("sys", 100, 60);
        // Each message ≈ 100/4 + 4 = 29 estimated tokens.
        m.push(ConversationMessage::user("a".repeat(100)));
        m.push(ConversationMessage::user("b".repeat(100)));
        m.push(ConversationMessage::user("c".repeat(100)));
        assert!(m.estimated_tokens() <= 60);
        let view = m.view();
        assert_eq!(view.len(), 2);
        assert!(view[1].content.starts_with('c'));
    }

    #[test]
    fn json_round_trip_is_identity_on_visible_content() {
        let mut m = memory();
        m.push(ConversationMessage::user("ping"));
        m.push(ConversationMessage::assistant("pong, over"));
        m.push(ConversationMessage::tool("call-1", "42"));

        let restored = ConversationMemory::from_json(&m.to_json().unwrap()).unwrap();
        assert_eq!(restored.view(), m.view());
        assert_eq!(restored.estimated_tokens(), m.estimated_tokens());
    }

    #[test]
    fn recent_turns_returns_last_dialogue_pairs() {
        let mut m = ConversationMemory::new("sys", 100, 10_000);
        for i in 0..5 {
            m.push(ConversationMessage::user(format!("q{i}")));
            m.push(ConversationMessage::assistant(format!("a{i}")));
        }
        m.push(ConversationMessage::tool("t", "tool noise"));

        let recent = m.recent_turns(2);
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q3", "a3", "q4", "a4"]);
    }

    #[test]
    fn clear_history_keeps_system() {
        let mut m = memory();
        m.push(ConversationMessage::user("x"));
        m.clear_history();
        assert_eq!(m.len(), 1);
        assert_eq!(m.system_prompt(), "You are a radio operator.");
    }
}
