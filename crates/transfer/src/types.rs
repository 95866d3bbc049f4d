use chunkyard_protocol::types::{UploadProgress, UploadStatus};

/// Snapshot of one transfer's progress.
///
/// Handed out by the [`SessionRegistry`](crate::SessionRegistry); the live
/// record stays inside the registry and is only mutated under its
/// per-identifier lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub identifier: String,
    pub bytes_received: u64,
    pub total_size: Option<u64>,
    pub state: UploadStatus,
}

impl UploadSession {
    /// Returns `true` while the transfer has not been completed.
    pub fn is_active(&self) -> bool {
        self.state == UploadStatus::InProgress
    }

    /// Returns progress as a protocol-compatible struct.
    pub fn progress(&self) -> UploadProgress {
        UploadProgress {
            filename: self.identifier.clone(),
            status: self.state,
            bytes_received: self.bytes_received,
            total_size: self.total_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_mirrors_session() {
        let session = UploadSession {
            identifier: "a.txt".into(),
            bytes_received: 5,
            total_size: Some(10),
            state: UploadStatus::InProgress,
        };
        assert!(session.is_active());

        let p = session.progress();
        assert_eq!(p.filename, "a.txt");
        assert_eq!(p.bytes_received, 5);
        assert_eq!(p.total_size, Some(10));
        assert_eq!(p.status, UploadStatus::InProgress);
    }

    #[test]
    fn complete_session_is_inactive() {
        let session = UploadSession {
            identifier: "a.txt".into(),
            bytes_received: 10,
            total_size: Some(10),
            state: UploadStatus::Complete,
        };
        assert!(!session.is_active());
    }
}
