use serde::{Deserialize, Serialize};
use crate::message::ContentBlock;

/// Largest file accepted as an attachment (5 MiB)
pub const MAX_ATTACHMENT_BYTES: u64 = 5 * 1024 * 1024;

/// A file staged for the next message. Discarded once folded into a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Attachment {
    Image {
        name: String,
        media_type: String,
        /// Base64 payload without a data-URL prefix
        data: String,
    },
    Text {
        name: String,
        data: String,
    },
}

impl Attachment {
    pub fn name(&self) -> &str {
        match self {
            Attachment::Image { name, .. } | Attachment::Text { name, .. } => name,
        }
    }

    pub fn into_block(self) -> ContentBlock {
        match self {
            Attachment::Image { media_type, data, .. } => ContentBlock::image(media_type, data),
            Attachment::Text { name, data } => {
                ContentBlock::text(format!("<file name=\"{}\">\n{}\n</file>", name, data))
            }
        }
    }
}

/// Why a file was left out of an attachment batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRejection {
    pub name: String,
    pub reason: String,
}
