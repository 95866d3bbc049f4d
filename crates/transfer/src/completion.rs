use crate::UploadSession;

/// Returns `true` when the session's total is known and has been reached.
///
/// Transfers with an unknown total never complete here; they have to be
/// finalized explicitly.
pub fn is_complete(session: &UploadSession) -> bool {
    session
        .total_size
        .is_some_and(|total| session.bytes_received >= total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkyard_protocol::UploadStatus;

    fn session(bytes_received: u64, total_size: Option<u64>) -> UploadSession {
        UploadSession {
            identifier: "a.txt".into(),
            bytes_received,
            total_size,
            state: UploadStatus::InProgress,
        }
    }

    #[test]
    fn incomplete_below_total() {
        assert!(!is_complete(&session(5, Some(10))));
    }

    #[test]
    fn complete_at_total() {
        assert!(is_complete(&session(10, Some(10))));
    }

    #[test]
    fn complete_past_total() {
        // Retried chunks can push the count past the total.
        assert!(is_complete(&session(15, Some(10))));
    }

    #[test]
    fn unknown_total_never_completes() {
        assert!(!is_complete(&session(0, None)));
        assert!(!is_complete(&session(u64::MAX, None)));
    }

    #[test]
    fn zero_total_completes_immediately() {
        assert!(is_complete(&session(0, Some(0))));
    }
}
