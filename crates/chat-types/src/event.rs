use serde::{Deserialize, Serialize};
use crate::thinking::StreamDelta;

/// Events emitted by the chat core.
/// The UI drains these to know what to re-render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    /// The session list or the current selection changed
    SessionsChanged,

    /// Messages were added to or replaced in a session
    MessagesChanged { session_id: String },

    /// A turn started; `message_id` is the assistant placeholder
    TurnStarted { turn_id: u64, session_id: String, message_id: String },

    /// A fragment was applied to the assistant placeholder
    Delta { turn_id: u64, message_id: String, kind: DeltaKind },

    /// The stream ended normally
    TurnCompleted { turn_id: u64 },

    /// The turn was stopped by the user; partial content is kept
    TurnCancelled { turn_id: u64 },

    /// The turn failed; the placeholder now carries the error
    TurnFailed { turn_id: u64, message: String },

    /// A file was left out of an attachment batch
    AttachmentRejected { name: String, reason: String },

    /// The staged attachments changed
    AttachmentsChanged { count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    Text,
    Thinking,
    ThinkingStart,
    ThinkingEnd,
}

impl From<&StreamDelta> for DeltaKind {
    fn from(delta: &StreamDelta) -> Self {
        match delta {
            StreamDelta::Text(_) => DeltaKind::Text,
            StreamDelta::Thinking(_) => DeltaKind::Thinking,
            StreamDelta::ThinkingStart => DeltaKind::ThinkingStart,
            StreamDelta::ThinkingEnd => DeltaKind::ThinkingEnd,
        }
    }
}
