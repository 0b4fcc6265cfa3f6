//! Ordered display log produced by one stream attempt

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of display message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A backend tool or milestone; completion mutates it in place
    ToolStart,
    /// Streamed answer text
    AgentText,
}

/// One entry in the message list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub id: Uuid,
    pub kind: MessageKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Only meaningful for [`MessageKind::ToolStart`]
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Tool output reported on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StreamMessage {
    fn new(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            content: content.into(),
            created_at: Utc::now(),
            is_complete: false,
            tool_name: None,
            detail: None,
        }
    }

    /// A running tool
    pub fn tool_start(label: impl Into<String>, tool_name: Option<String>) -> Self {
        Self {
            tool_name,
            ..Self::new(MessageKind::ToolStart, label)
        }
    }

    /// A tool-start marker that is already complete
    pub fn milestone(label: impl Into<String>) -> Self {
        Self {
            is_complete: true,
            ..Self::new(MessageKind::ToolStart, label)
        }
    }

    pub fn agent_text(content: impl Into<String>) -> Self {
        Self::new(MessageKind::AgentText, content)
    }

    pub fn is_pending_tool(&self) -> bool {
        self.kind == MessageKind::ToolStart && !self.is_complete
    }
}

/// Whether the tail of the store is a text message new deltas extend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextCursor {
    #[default]
    Closed,
    Open,
}

/// Append-only message log with a single mutable tail for streamed text
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: Vec<StreamMessage>,
    cursor: TextCursor,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Appending text opens the cursor; anything else closes it.
    pub fn append(&mut self, message: StreamMessage) {
        self.cursor = match message.kind {
            MessageKind::AgentText => TextCursor::Open,
            MessageKind::ToolStart => TextCursor::Closed,
        };
        self.messages.push(message);
    }

    /// Extend the open text message, or start a new one
    pub fn push_text(&mut self, delta: &str) {
        if self.cursor == TextCursor::Open {
            if let Some(last) = self.messages.last_mut() {
                last.content.push_str(delta);
                return;
            }
        }
        self.append(StreamMessage::agent_text(delta));
    }

    /// Apply `updater` to the last message matching `predicate`, scanning
    /// from the tail. Returns whether anything matched.
    pub fn mutate_last<P, U>(&mut self, predicate: P, updater: U) -> bool
    where
        P: Fn(&StreamMessage) -> bool,
        U: FnOnce(&mut StreamMessage),
    {
        match self.messages.iter_mut().rev().find(|m| predicate(m)) {
            Some(message) => {
                updater(message);
                true
            }
            None => false,
        }
    }

    /// Stop extending the tail; the next text delta starts a new message
    pub fn close_text(&mut self) {
        self.cursor = TextCursor::Closed;
    }

    pub fn cursor(&self) -> TextCursor {
        self.cursor
    }

    /// Read-only ordered view
    pub fn snapshot(&self) -> &[StreamMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.cursor = TextCursor::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_text_starts_new_message() {
        let mut store = MessageStore::new();
        store.push_text("Hello wo");
        store.close_text();
        store.push_text("Hello ");
        store.push_text("world");
        assert_eq!(store.len(), 2);
        assert_eq!(store.snapshot()[0].content, "Hello wo");
        assert_eq!(store.snapshot()[1].content, "Hello world");
    }

    #[test]
    fn test_text_extends_open_tail() {
        let mut store = MessageStore::new();
        store.push_text("Hello ");
        store.push_text("world");
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot()[0].content, "Hello world");
        assert_eq!(store.cursor(), TextCursor::Open);
    }

    #[test]
    fn test_tool_closes_cursor() {
        let mut store = MessageStore::new();
        store.push_text("a");
        store.append(StreamMessage::tool_start("fetch", None));
        assert_eq!(store.cursor(), TextCursor::Closed);
        store.push_text("b");
        let kinds: Vec<_> = store.snapshot().iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![MessageKind::AgentText, MessageKind::ToolStart, MessageKind::AgentText]
        );
        assert_eq!(store.snapshot()[2].content, "b");
    }

    #[test]
    fn test_mutate_last_scans_from_tail() {
        let mut store = MessageStore::new();
        store.append(StreamMessage::tool_start("first", None));
        store.append(StreamMessage::tool_start("second", None));
        store.push_text("text");

        assert!(store.mutate_last(StreamMessage::is_pending_tool, |m| m.is_complete = true));
        assert!(!store.snapshot()[0].is_complete);
        assert!(store.snapshot()[1].is_complete);
        // completing an earlier tool leaves the text tail open
        assert_eq!(store.cursor(), TextCursor::Open);
    }

    #[test]
    fn test_mutate_last_without_match_is_noop() {
        let mut store = MessageStore::new();
        store.append(StreamMessage::milestone("started"));
        let before = store.snapshot().to_vec();
        assert!(!store.mutate_last(StreamMessage::is_pending_tool, |m| m.content.clear()));
        assert_eq!(store.snapshot(), before.as_slice());
    }

    #[test]
    fn test_clear_resets_cursor() {
        let mut store = MessageStore::new();
        store.push_text("a");
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.cursor(), TextCursor::Closed);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = StreamMessage::agent_text("a");
        let b = StreamMessage::agent_text("a");
        assert_ne!(a.id, b.id);
    }
}
