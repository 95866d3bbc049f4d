use serde::{Deserialize, Serialize};

/// Current state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "complete")]
    Complete,
}

/// Outcome of an accepted chunk, sent back in `X-Upload-Status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkStatus {
    /// Chunk stored, transfer still ongoing.
    #[serde(rename = "partial")]
    Partial,
    /// Chunk stored and the declared total has been reached.
    #[serde(rename = "complete")]
    Complete,
}

impl ChunkStatus {
    /// Returns the header value for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Partial => "partial",
            Self::Complete => "complete",
        }
    }

    /// Parses a header value produced by [`as_str`](Self::as_str).
    pub fn from_header(value: &str) -> Option<Self> {
        match value.trim() {
            "partial" => Some(Self::Partial),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

/// Progress information for one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub filename: String,
    pub status: UploadStatus,
    pub bytes_received: u64,
    /// `None` while the client has only sent `*` totals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_status_serialization() {
        assert_eq!(
            serde_json::to_string(&UploadStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&UploadStatus::Complete).unwrap(),
            "\"complete\""
        );
    }

    #[test]
    fn chunk_status_header_values() {
        assert_eq!(ChunkStatus::Partial.as_str(), "partial");
        assert_eq!(
            ChunkStatus::from_header(" complete "),
            Some(ChunkStatus::Complete)
        );
        assert_eq!(ChunkStatus::from_header("done"), None);
    }

    #[test]
    fn upload_progress_field_names() {
        let json = r#"{"filename":"a.txt","status":"in_progress","bytesReceived":5,"totalSize":10}"#;
        let p: UploadProgress = serde_json::from_str(json).unwrap();
        assert_eq!(p.filename, "a.txt");
        assert_eq!(p.bytes_received, 5);
        assert_eq!(p.total_size, Some(10));
    }

    #[test]
    fn upload_progress_omits_unknown_total() {
        let p = UploadProgress {
            filename: "b.bin".into(),
            status: UploadStatus::InProgress,
            bytes_received: 3,
            total_size: None,
        };
        let json = serde_json::to_string(&p).unwrap();
        assert!(!json.contains("totalSize"));
    }
}
