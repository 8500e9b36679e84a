//! Attached files (cover art, fonts, ...).

use serde::{Deserialize, Serialize};

/// Where the payload of an attachment lives.
///
/// Attachments parsed from a file keep a byte range into that file so large
/// payloads are not loaded eagerly; attachments created by the caller own
/// their bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentData {
    /// In-memory payload.
    Buffer(Vec<u8>),
    /// Byte range within the source file the attachment was parsed from.
    FileRange { offset: u64, size: u64 },
}

impl Default for AttachmentData {
    fn default() -> Self {
        AttachmentData::Buffer(Vec::new())
    }
}

impl AttachmentData {
    pub fn size(&self) -> u64 {
        match self {
            AttachmentData::Buffer(data) => data.len() as u64,
            AttachmentData::FileRange { size, .. } => *size,
        }
    }
}

/// A single attached file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Attachment {
    pub uid: u64,
    pub name: String,
    pub mime_type: String,
    pub description: String,
    pub data: AttachmentData,
    /// Marked for removal; skipped when the file is rewritten.
    pub ignored: bool,
}

impl Attachment {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.data.size() == 0
    }
}
