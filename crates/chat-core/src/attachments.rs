//! Attachment ingestion: user files to staged attachments.
//!
//! Every file is handled independently. An oversized or unreadable file is
//! left out of the batch without affecting the others.

use std::rc::Rc;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use futures::future::join_all;
use chat_types::{
    ChatError,
    attachment::{Attachment, AttachmentRejection, MAX_ATTACHMENT_BYTES},
};
use crate::ports::FileSource;

/// Outcome of ingesting one batch of files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Accepted files, in the order they were supplied
    pub attachments: Vec<Attachment>,
    /// Files left out, with a user-facing reason
    pub rejected: Vec<AttachmentRejection>,
}

/// Read a batch of files concurrently and convert them to attachments.
pub async fn ingest(files: Vec<Rc<dyn FileSource>>) -> IngestReport {
    let results = join_all(files.iter().map(|f| ingest_one(f.as_ref()))).await;

    let mut report = IngestReport::default();
    for (file, result) in files.iter().zip(results) {
        match result {
            Ok(attachment) => report.attachments.push(attachment),
            Err(e) => report.rejected.push(AttachmentRejection {
                name: file.name(),
                reason: e.to_string(),
            }),
        }
    }
    report
}

async fn ingest_one(file: &dyn FileSource) -> chat_types::Result<Attachment> {
    let name = file.name();
    let size = file.size();
    if size > MAX_ATTACHMENT_BYTES {
        log::warn!("Rejecting {}: {} bytes exceeds the attachment limit", name, size);
        return Err(ChatError::AttachmentTooLarge { name, size });
    }

    let bytes = file.read_bytes().await.map_err(|e| {
        log::error!("Error reading file {}: {}", name, e);
        ChatError::Attachment {
            name: name.clone(),
            message: e.to_string(),
        }
    })?;
    let media_type = file.media_type();

    if media_type.starts_with("image/") {
        Ok(Attachment::Image {
            name,
            media_type,
            data: BASE64_STANDARD.encode(&bytes),
        })
    } else {
        Ok(Attachment::Text {
            name,
            data: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}
