use serde::{Deserialize, Serialize};
use crate::message::{ContentBlock, Message, MessageContent, Role};

pub const DEFAULT_TITLE: &str = "New chat";
const TITLE_MAX_CHARS: usize = 30;

/// A persisted conversation session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    /// Milliseconds since the Unix epoch
    pub updated_at: i64,
}

impl ChatSession {
    pub fn new(id: String) -> Self {
        Self {
            id,
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            updated_at: self.updated_at,
            message_count: self.messages.len(),
        }
    }
}

/// Title for a session whose first message is `first`, if it can be
/// derived. Only user messages name a session.
pub fn derive_title(first: &Message) -> Option<String> {
    if first.role() != Role::User {
        return None;
    }
    let source = match &first.content {
        MessageContent::Text(s) => s.trim(),
        MessageContent::Blocks(blocks) => {
            let texts: Vec<&str> = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect();
            // Prefer the typed prompt over an inlined file
            texts
                .iter()
                .rev()
                .find(|t| !t.starts_with("<file name="))
                .or_else(|| texts.first())
                .copied()?
                .trim()
        }
    };
    if source.is_empty() {
        return None;
    }
    Some(truncate_title(source))
}

fn truncate_title(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Summary of a session for listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub updated_at: i64,
    pub message_count: usize,
}
