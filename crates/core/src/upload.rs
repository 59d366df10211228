//! Upload status records and archive identifiers.

use serde::{Deserialize, Serialize};

/// Whether an upload has reached end-of-data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// Bytes are still flowing, or the stream failed before completion.
    Pending,
    /// The upload stream reported end-of-data.
    Done,
}

impl UploadState {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Progress of a named upload as reported by the storage service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadStatus {
    /// Client-attached metadata, `null` if none was set.
    pub extra: serde_json::Value,
    pub status: UploadState,
    /// Bytes consumed so far.
    pub n: i64,
    /// Declared size, or -1 if unknown.
    pub size: i64,
    /// Terminal stream error other than end-of-data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response to a successful archive upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: String,
}

/// Reduce a client-supplied archive id to its final path segment.
///
/// Returns `None` for ids that have no usable basename.
pub fn sanitize_archive_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim_end_matches(['/', '\\']);
    let base = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed);
    match base {
        "" | "." | ".." => None,
        _ => Some(base.to_string()),
    }
}
