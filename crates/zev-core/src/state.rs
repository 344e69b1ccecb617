//! UI-agnostic conversation state types
//!
//! These structures are shared by every front end (the TUI, the one-shot
//! CLI commands) and are what gets mirrored into storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flush::Flushed;
use crate::groq::types::WireMessage;

const TITLE_MAX_CHARS: usize = 40;
pub const UNTITLED: &str = "New chat";

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// A chat message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set while the assistant is still streaming into this message.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub streaming: bool,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            reasoning: None,
            created_at: Utc::now(),
            streaming: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: UNTITLED.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push_system(&mut self, text: impl Into<String>) -> Uuid {
        self.push(ChatMessage::new(ChatRole::System, text))
    }

    /// Add a user message. The first one names the conversation.
    pub fn push_user(&mut self, text: impl Into<String>) -> Uuid {
        let message = ChatMessage::new(ChatRole::User, text);
        if self.title == UNTITLED {
            self.title = derive_title(&message.content);
        }
        self.push(message)
    }

    /// Add a finished assistant message, e.g. a pipeline step result.
    pub fn push_assistant(&mut self, text: impl Into<String>) -> Uuid {
        self.push(ChatMessage::new(ChatRole::Assistant, text))
    }

    /// Open an empty assistant message that streamed text will be appended to.
    pub fn start_assistant(&mut self) -> Uuid {
        let mut message = ChatMessage::new(ChatRole::Assistant, "");
        message.streaming = true;
        self.push(message)
    }

    /// Append a flushed batch to a streaming message.
    ///
    /// Returns `false` when the message is unknown or already finished.
    pub fn append(&mut self, id: Uuid, batch: &Flushed) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        if !message.streaming {
            return false;
        }
        if let Some(content) = &batch.content {
            message.content.push_str(content);
        }
        if let Some(reasoning) = &batch.reasoning {
            message
                .reasoning
                .get_or_insert_with(String::new)
                .push_str(reasoning);
        }
        self.touch();
        true
    }

    /// Mark a streaming message complete; it is immutable from here on.
    pub fn finish_message(&mut self, id: Uuid) {
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
            message.streaming = false;
            self.touch();
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.messages.iter().any(|m| m.streaming)
    }

    /// Close replies left open by a process that exited mid-stream.
    ///
    /// Partial text is kept; placeholders that never received any are dropped.
    /// Returns whether anything changed.
    pub fn settle_interrupted(&mut self) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| {
            !(m.streaming && m.role == ChatRole::Assistant && m.content.is_empty() && m.reasoning.is_none())
        });
        let mut changed = self.messages.len() != before;
        for message in self.messages.iter_mut().filter(|m| m.streaming) {
            message.streaming = false;
            changed = true;
        }
        changed
    }

    /// History in wire form, skipping assistant placeholders with no text yet.
    pub fn request_messages(&self) -> Vec<WireMessage> {
        self.messages
            .iter()
            .filter(|m| !(m.role == ChatRole::Assistant && m.content.is_empty()))
            .map(|m| WireMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn push(&mut self, message: ChatMessage) -> Uuid {
        let id = message.id;
        self.messages.push(message);
        self.touch();
        id
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn derive_title(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return UNTITLED.to_string();
    }
    if collapsed.chars().count() <= TITLE_MAX_CHARS {
        return collapsed;
    }
    let truncated: String = collapsed.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}...", truncated.trim_end())
}
