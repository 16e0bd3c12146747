//! File descriptors produced by the storage collaborator.
//!
//! The engine embeds these into ledger records as-is and never inspects the
//! underlying blob.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Document,
    Image,
}

impl FileType {
    /// Classify a MIME type the way the upload layer does.
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("image/") {
            Self::Image
        } else {
            Self::Document
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportingDocument {
    pub file_name: String,
    pub original_name: String,
    #[serde(rename = "downloadURL")]
    pub download_url: String,
    pub storage_path: String,
    pub file_size: u64,
    pub mime_type: String,
    pub file_type: FileType,
    pub uploaded_at: DateTime<Utc>,
}
